//! The socket service.
//!
//! A [`SocketService`] owns the native [`Transport`], the registry of every
//! live socket it created, and the [`AsyncScope`] counting operations in
//! flight. Sockets are plain [`SocketImpl`] records; every operation is a
//! method on the service taking the record.
//!
//! Synchronous operations block the calling thread until the transport
//! reports back. Asynchronous operations return straight away; their result is
//! handed to a [`Handler`] which is posted to the caller's [`Executor`], never
//! run on the caller's stack or on a transport thread.
//!
//! ```
//! use nwio::{
//!   BufResult,
//!   executor::Scheduler,
//!   ip::{Tcp, TcpEndpoint},
//!   native::loopback::Loopback,
//!   service::SocketService,
//! };
//! use std::time::Duration;
//!
//! let net = Loopback::new().unwrap();
//! let peer = net.listen("127.0.0.1:9000".parse().unwrap()).unwrap();
//! let service = SocketService::new(net);
//!
//! let socket = service.construct();
//! service.open(&socket, &Tcp::v4()).unwrap();
//! service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();
//!
//! let scheduler = Scheduler::new();
//! let on_sent = |(res, _buf): BufResult<usize, Vec<u8>>| assert_eq!(res, Ok(4));
//! service.async_send(&socket, b"ping".to_vec(), Default::default(), &scheduler.handle(), on_sent);
//! assert!(scheduler.run_one_timeout(Duration::from_secs(5)));
//!
//! service.shutdown();
//! ```

use std::{
  ptr::NonNull,
  sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
  },
};

use crate::{
  config::ServiceConfig,
  endpoint::Protocol,
  error::{Error, Result},
  executor::{Executor, Task},
  handle::NwPtr,
  native::{SocketKind, Transport},
  op::{AsyncOp, Delivery, Finish, Handler},
  option::WaitType,
  scope::AsyncScope,
  store::{Arena, Key},
  sync::Mutex,
};

use self::record::{Record, RecordState};

mod connect;
mod io;
mod record;

/// Owned native handles of a socket, as taken by
/// [`assign`](SocketService::assign) and returned by
/// [`release`](SocketService::release).
pub struct NativeHandle<T: Transport> {
  pub parameters: NwPtr<T::Parameters>,
  pub connection: NwPtr<T::Connection>,
}

/// Borrowed native handles of a socket. Valid only while the socket keeps
/// them; no reference is transferred.
pub struct RawNativeHandle<T: Transport> {
  pub parameters: Option<NonNull<T::Parameters>>,
  pub connection: Option<NonNull<T::Connection>>,
}

impl<T: Transport> Clone for RawNativeHandle<T> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T: Transport> Copy for RawNativeHandle<T> {}

pub(crate) struct ServiceInner<T: Transport> {
  transport: Arc<T>,
  registry: Mutex<Arena<Arc<Record<T>>>>,
  scope: AsyncScope,
  config: ServiceConfig,
  shut_down: AtomicBool,
}

impl<T: Transport> ServiceInner<T> {
  fn close_all(&self) -> usize {
    let records: Vec<Arc<Record<T>>> =
      self.registry.lock().iter().map(|(_, record)| record.clone()).collect();
    for record in &records {
      record.close(&self.transport);
    }
    records.len()
  }
}

impl<T: Transport> Drop for ServiceInner<T> {
  fn drop(&mut self) {
    if !self.shut_down.load(Ordering::Acquire) {
      let closed = self.close_all();
      tracing::debug!(closed, "socket service dropped without shutdown");
    }
  }
}

/// Service managing sockets over the transport `T`. Clones share the service.
pub struct SocketService<T: Transport> {
  inner: Arc<ServiceInner<T>>,
}

impl<T: Transport> Clone for SocketService<T> {
  fn clone(&self) -> Self {
    Self { inner: self.inner.clone() }
  }
}

/// One socket of a [`SocketService`].
///
/// Dropping it destroys the socket: pending operations are cancelled, the
/// connection is torn down and the record leaves the registry.
pub struct SocketImpl<T: Transport> {
  key: Key,
  record: Arc<Record<T>>,
  service: Weak<ServiceInner<T>>,
}

impl<T: Transport> SocketImpl<T> {
  /// Registry key, stable for the socket's life within one service.
  pub fn key(&self) -> Key {
    self.key
  }
}

impl<T: Transport> Drop for SocketImpl<T> {
  fn drop(&mut self) {
    if let Some(service) = self.service.upgrade() {
      service.registry.lock().remove(self.key);
      self.record.close(&service.transport);
    }
  }
}

impl<T: Transport> std::fmt::Debug for SocketImpl<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SocketImpl")
      .field("key", &self.key)
      .field("open", &self.record.is_open())
      .finish()
  }
}

impl<T: Transport> SocketService<T> {
  pub fn new(transport: T) -> Self {
    Self::with_config(transport, ServiceConfig::default())
  }

  pub fn with_config(transport: T, config: ServiceConfig) -> Self {
    Self {
      inner: Arc::new(ServiceInner {
        transport: Arc::new(transport),
        registry: Mutex::new(Arena::with_capacity(config.get_registry_capacity())),
        scope: AsyncScope::new(),
        config,
        shut_down: AtomicBool::new(false),
      }),
    }
  }

  pub fn transport(&self) -> &T {
    &self.inner.transport
  }

  pub fn config(&self) -> &ServiceConfig {
    &self.inner.config
  }

  /// Number of live sockets.
  pub fn socket_count(&self) -> usize {
    self.inner.registry.lock().len()
  }

  /// Number of operations admitted and not yet completed.
  pub fn outstanding_operations(&self) -> usize {
    self.inner.scope.outstanding()
  }

  pub fn is_shut_down(&self) -> bool {
    self.inner.shut_down.load(Ordering::Acquire)
  }

  /// Closes every socket, then blocks until every admitted operation has
  /// delivered its completion. Later calls return immediately.
  ///
  /// Must not be called from a handler or a transport callback.
  pub fn shutdown(&self) {
    if self.inner.shut_down.swap(true, Ordering::AcqRel) {
      return;
    }
    let closed = self.inner.close_all();
    let outstanding = self.inner.scope.outstanding();
    tracing::debug!(closed, outstanding, "socket service shutting down");
    self.inner.scope.shutdown_and_wait();
    tracing::debug!("socket service shut down");
  }

  fn owns(&self, socket: &SocketImpl<T>) -> bool {
    Weak::ptr_eq(&socket.service, &Arc::downgrade(&self.inner))
  }

  // Lifecycle.

  /// Creates a closed socket.
  pub fn construct(&self) -> SocketImpl<T> {
    let record = Arc::new(Record::new());
    let key = self.inner.registry.lock().insert(record.clone());
    tracing::trace!(?key, "socket constructed");
    SocketImpl { key, record, service: Arc::downgrade(&self.inner) }
  }

  /// Destroys a socket. Same as dropping it.
  pub fn destroy(&self, socket: SocketImpl<T>) {
    debug_assert!(self.owns(&socket));
    drop(socket);
  }

  /// Creates a socket holding `other`'s handles. `other` is left closed;
  /// operations already pending on it stay with it.
  pub fn move_construct(&self, other: &mut SocketImpl<T>) -> SocketImpl<T> {
    let socket = self.construct();
    socket.record.put(other.record.take());
    socket
  }

  /// Closes `socket`, then moves `other`'s handles into it and leaves `other`
  /// closed. `socket` ends up registered with `other_service`, the service
  /// `other` belonged to.
  pub fn move_assign(
    &self,
    socket: &mut SocketImpl<T>,
    other_service: &SocketService<T>,
    other: &mut SocketImpl<T>,
  ) {
    debug_assert!(self.owns(socket));
    debug_assert!(other_service.owns(other));

    socket.record.close(&self.inner.transport);
    socket.record.put(other.record.take());

    if !Arc::ptr_eq(&self.inner, &other_service.inner) {
      self.inner.registry.lock().remove(socket.key);
      socket.key = other_service.inner.registry.lock().insert(socket.record.clone());
      socket.service = Arc::downgrade(&other_service.inner);
      tracing::trace!(key = ?socket.key, "socket moved to another service");
    }
  }

  pub fn is_open(&self, socket: &SocketImpl<T>) -> bool {
    socket.record.is_open()
  }

  /// Opens `socket` for `protocol`. Datagram sockets get the configured
  /// datagram receive size.
  pub fn open<P: Protocol>(&self, socket: &SocketImpl<T>, protocol: &P) -> Result<()> {
    let kind = protocol.kind().ok_or(Error::OperationNotSupported)?;
    if socket.record.is_open() {
      return Err(Error::AlreadyOpen);
    }
    let max_receive_size = match kind {
      SocketKind::Datagram => self.inner.config.get_max_datagram_receive_size(),
      SocketKind::Stream => 0,
    };
    let parameters = self.inner.transport.create_parameters(kind);
    self.open_with(socket, parameters, max_receive_size)
  }

  /// Opens `socket` with ready-made parameters.
  pub fn open_with(
    &self,
    socket: &SocketImpl<T>,
    parameters: NwPtr<T::Parameters>,
    max_receive_size: usize,
  ) -> Result<()> {
    if parameters.is_none() {
      return Err(Error::BadDescriptor);
    }
    socket.record.open(parameters, max_receive_size)?;
    tracing::debug!(key = ?socket.key, max_receive_size, "socket opened");
    Ok(())
  }

  /// Adopts existing native handles. The parameters are required; the
  /// connection may be empty.
  pub fn assign(
    &self,
    socket: &SocketImpl<T>,
    handle: NativeHandle<T>,
    max_receive_size: usize,
  ) -> Result<()> {
    if socket.record.is_open() {
      return Err(Error::AlreadyOpen);
    }
    if handle.parameters.is_none() {
      return Err(Error::BadDescriptor);
    }
    socket.record.assign(handle.parameters, handle.connection, max_receive_size)?;
    tracing::debug!(key = ?socket.key, "socket assigned");
    Ok(())
  }

  /// Gives up ownership of the native handles, leaving `socket` closed.
  /// Pending operations are cancelled first.
  pub fn release(&self, socket: &SocketImpl<T>) -> Result<NativeHandle<T>> {
    if !socket.record.is_open() {
      return Err(Error::BadDescriptor);
    }
    socket.record.cancel(&self.inner.transport);
    let state = socket.record.take();
    if let Some(connection) = state.connection.as_ref() {
      self.inner.transport.set_state_changed_handler(connection, None);
    }
    tracing::debug!(key = ?socket.key, "socket released");
    let RecordState { parameters, connection, .. } = state;
    Ok(NativeHandle { parameters, connection })
  }

  pub fn native_handle(&self, socket: &SocketImpl<T>) -> RawNativeHandle<T> {
    match socket.record.handles() {
      Ok((parameters, connection)) => {
        RawNativeHandle { parameters: parameters.get(), connection: connection.get() }
      }
      Err(_) => RawNativeHandle { parameters: None, connection: None },
    }
  }

  /// Cancels pending operations, tears down the connection and releases
  /// both handles. Closing a closed socket does nothing.
  pub fn close(&self, socket: &SocketImpl<T>) -> Result<()> {
    socket.record.close(&self.inner.transport);
    Ok(())
  }

  /// Finishes every pending operation of `socket` with
  /// [`Error::OperationAborted`]. The socket itself is unchanged.
  ///
  /// Receives are withdrawn from the transport and finish once it confirms,
  /// unless data reached them first, in which case they complete with it.
  pub fn cancel(&self, socket: &SocketImpl<T>) -> Result<()> {
    if !socket.record.is_open() {
      return Err(Error::BadDescriptor);
    }
    let cancelled = socket.record.cancel(&self.inner.transport);
    tracing::trace!(key = ?socket.key, cancelled, "socket operations cancelled");
    Ok(())
  }

  // Primitives the transport has no equivalent for.

  pub fn at_mark(&self, _socket: &SocketImpl<T>) -> Result<bool> {
    Err(Error::OperationNotSupported)
  }

  pub fn available(&self, _socket: &SocketImpl<T>) -> Result<usize> {
    Err(Error::OperationNotSupported)
  }

  pub fn io_control<C>(&self, _socket: &SocketImpl<T>, _command: &mut C) -> Result<()> {
    Err(Error::OperationNotSupported)
  }

  pub fn non_blocking(&self, _socket: &SocketImpl<T>) -> bool {
    false
  }

  pub fn set_non_blocking(&self, _socket: &SocketImpl<T>, _mode: bool) -> Result<()> {
    Err(Error::OperationNotSupported)
  }

  pub fn native_non_blocking(&self, _socket: &SocketImpl<T>) -> bool {
    false
  }

  pub fn set_native_non_blocking(&self, _socket: &SocketImpl<T>, _mode: bool) -> Result<()> {
    Err(Error::OperationNotSupported)
  }

  pub fn wait(&self, _socket: &SocketImpl<T>, _what: WaitType) -> Result<()> {
    Err(Error::OperationNotSupported)
  }

  pub fn async_wait<X, H>(&self, _socket: &SocketImpl<T>, _what: WaitType, executor: &X, handler: H)
  where
    X: Executor,
    H: Handler<Result<()>>,
  {
    executor.post(Box::new(move || handler.call(Err(Error::OperationNotSupported))));
  }

  /// Waiting for writability. Not supported.
  pub fn send_null(&self, _socket: &SocketImpl<T>) -> Result<usize> {
    Err(Error::OperationNotSupported)
  }

  pub fn async_send_null<X, H>(&self, _socket: &SocketImpl<T>, executor: &X, handler: H)
  where
    X: Executor,
    H: Handler<Result<usize>>,
  {
    executor.post(Box::new(move || handler.call(Err(Error::OperationNotSupported))));
  }

  /// Waiting for readability. Not supported.
  pub fn receive_null(&self, _socket: &SocketImpl<T>) -> Result<usize> {
    Err(Error::OperationNotSupported)
  }

  pub fn async_receive_null<X, H>(&self, _socket: &SocketImpl<T>, executor: &X, handler: H)
  where
    X: Executor,
    H: Handler<Result<usize>>,
  {
    executor.post(Box::new(move || handler.call(Err(Error::OperationNotSupported))));
  }

  // Operation plumbing shared by connect and I/O.

  /// Builds an op whose result goes through `convert` into `handler`, posted
  /// to `executor`. Once the service is shut down the handler is posted
  /// straight away with [`Error::ServiceShutdown`] and `None` is returned.
  fn posted_op<N, R, X, H, C>(
    &self,
    executor: &X,
    handler: H,
    convert: C,
  ) -> Option<Arc<AsyncOp<N>>>
  where
    N: Send + 'static,
    R: Send + 'static,
    X: Executor + Clone,
    H: Handler<R>,
    C: FnOnce(Result<N>) -> R + Send + 'static,
  {
    let is_continuation = handler.is_continuation();
    let ticket = match self.inner.scope.operation_started() {
      Ok(ticket) => ticket,
      Err(err) => {
        let result = convert(Err(err));
        executor.post(Box::new(move || handler.call(result)));
        return None;
      }
    };

    let finish: Finish<N> = Box::new(move |result| {
      let result = convert(result);
      Box::new(move || handler.call(result)) as Task
    });
    let delivery = Delivery::Post { executor: Box::new(executor.clone()), is_continuation };
    Some(AsyncOp::new(finish, delivery, ticket))
  }

  /// Builds an op for a blocking call, with the receiving end to wait on.
  fn blocking_op<N: Send + 'static>(&self) -> Result<(Arc<AsyncOp<N>>, Blocked<N>)> {
    let ticket = self.inner.scope.operation_started()?;
    let (tx, rx) = crossbeam_channel::bounded(1);
    let finish: Finish<N> = Box::new(move |result| {
      Box::new(move || {
        let _ = tx.send(result);
      }) as Task
    });
    Ok((AsyncOp::new(finish, Delivery::Inline, ticket), Blocked(rx)))
  }
}

/// The waiting half of a blocking call.
struct Blocked<N>(crossbeam_channel::Receiver<Result<N>>);

impl<N> Blocked<N> {
  fn wait(self) -> Result<N> {
    self.0.recv().unwrap_or(Err(Error::OperationAborted))
  }
}
