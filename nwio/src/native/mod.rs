//! The native transport contract.
//!
//! A [`Transport`] is a callback-driven networking substrate whose objects are
//! reference counted and opaque: connection parameters, connections,
//! endpoints and data blobs. Everything it hands out is wrapped in an
//! [`NwPtr`] straight away.
//!
//! Completions and state changes are delivered by calling the closures passed
//! in, on threads the transport owns. A transport must never deliver two
//! completions for the same connection at the same time, but different
//! connections are independent.
//!
//! [`loopback::Loopback`] is an in-process implementation with a dispatch
//! thread and scriptable peers.

use std::{net::SocketAddr, sync::Arc};

use crate::{error::NativeError, handle::{NativeObject, NwPtr}};

pub mod loopback;

/// Transport family of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
  /// Reliable byte stream (TCP).
  Stream,
  /// Message oriented, each receive yields at most one datagram (UDP).
  Datagram,
}

/// Lifecycle of a native connection, as reported to its state handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  /// The connection cannot make progress right now, for the given reason.
  Waiting(NativeError),
  Preparing,
  Ready,
  Failed(NativeError),
  Cancelled,
}

impl ConnectionState {
  /// Whether a connect attempt is decided by this state.
  pub fn settles_connect(&self) -> bool {
    matches!(
      self,
      ConnectionState::Ready
        | ConnectionState::Waiting(_)
        | ConnectionState::Failed(_)
        | ConnectionState::Cancelled
    )
  }
}

/// Outcome of one native receive.
pub struct Received<D: NativeObject> {
  /// Received bytes. Empty when nothing arrived.
  pub content: NwPtr<D>,
  /// The message (datagram) or the stream ended with this delivery.
  pub is_complete: bool,
  pub error: Option<NativeError>,
}

pub type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;
pub type SendCompletion = Box<dyn FnOnce(Option<NativeError>) + Send>;
pub type ReceiveCompletion<D> = Box<dyn FnOnce(Received<D>) + Send>;

pub trait Transport: Send + Sync + 'static {
  type Parameters: NativeObject;
  type Connection: NativeObject;
  type Endpoint: NativeObject + PartialEq;
  type Data: NativeObject;

  // Parameters.

  fn create_parameters(&self, kind: SocketKind) -> NwPtr<Self::Parameters>;
  /// Deep copy, so later mutations do not affect `parameters`.
  fn copy_parameters(&self, parameters: &Self::Parameters) -> NwPtr<Self::Parameters>;
  fn parameters_kind(&self, parameters: &Self::Parameters) -> SocketKind;
  fn set_local_endpoint(&self, parameters: &Self::Parameters, endpoint: Option<&Self::Endpoint>);
  fn local_endpoint(&self, parameters: &Self::Parameters) -> NwPtr<Self::Endpoint>;
  fn set_reuse_local_address(&self, parameters: &Self::Parameters, reuse: bool);
  fn reuse_local_address(&self, parameters: &Self::Parameters) -> bool;
  fn set_keepalive(&self, parameters: &Self::Parameters, enable: bool);
  fn keepalive(&self, parameters: &Self::Parameters) -> bool;
  fn set_no_delay(&self, parameters: &Self::Parameters, enable: bool);
  fn no_delay(&self, parameters: &Self::Parameters) -> bool;

  // Endpoints.

  fn create_endpoint(&self, addr: SocketAddr) -> NwPtr<Self::Endpoint>;
  fn endpoint_address(&self, endpoint: &Self::Endpoint) -> Option<SocketAddr>;

  // Connections.

  fn create_connection(
    &self,
    endpoint: &Self::Endpoint,
    parameters: &Self::Parameters,
  ) -> NwPtr<Self::Connection>;
  /// Replaces the state handler. `None` drops the current one.
  fn set_state_changed_handler(&self, connection: &Self::Connection, handler: Option<StateHandler>);
  fn start(&self, connection: &Self::Connection);
  /// Asynchronously tears the connection down. Pending receives complete
  /// with `ECANCELED` and the state handler sees `Cancelled`.
  fn cancel(&self, connection: &Self::Connection);
  fn connection_local_endpoint(&self, connection: &Self::Connection) -> NwPtr<Self::Endpoint>;
  fn connection_remote_endpoint(&self, connection: &Self::Connection) -> NwPtr<Self::Endpoint>;
  /// Queues `content` for sending. `is_complete` ends the message; on a
  /// stream it also ends the sending direction.
  fn send(
    &self,
    connection: &Self::Connection,
    content: Option<&Self::Data>,
    is_complete: bool,
    completion: SendCompletion,
  );
  /// Withdraws every receive registered so far, completing each with
  /// `ECANCELED`. The connection stays usable; bytes arriving later wait for
  /// the next receive.
  fn cancel_receives(&self, connection: &Self::Connection);
  /// Registers a receive of between `min` and `max` bytes.
  fn receive(
    &self,
    connection: &Self::Connection,
    min: usize,
    max: usize,
    completion: ReceiveCompletion<Self::Data>,
  );

  // Data.

  fn create_data(&self, bytes: &[u8]) -> NwPtr<Self::Data>;
  /// Logical concatenation. Implementations may share the regions.
  fn concat_data(&self, head: &Self::Data, tail: &Self::Data) -> NwPtr<Self::Data>;
  fn data_size(&self, data: &Self::Data) -> usize;
  /// Calls `f` with each contiguous region in order until it returns false.
  /// Returns false if `f` stopped early.
  fn apply_data(&self, data: &Self::Data, f: &mut dyn FnMut(&[u8]) -> bool) -> bool;
}
