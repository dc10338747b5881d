//! Socket options, message flags and the small enums of the socket API.
//!
//! Options live in the connection parameters, and the transport reads them
//! once when a connection is created. So an option can only be changed while
//! the socket has no connection: after that, setting it fails with
//! [`Error::AlreadyConnected`] and leaves the parameters untouched.
//!
//! Buffer sizes and linger have no counterpart in the transport and always
//! fail with [`Error::OperationNotSupported`].

use std::{ops::BitOr, time::Duration};

use crate::{
  error::{Error, Result},
  native::Transport,
};

/// A readable and writable socket option.
pub trait SocketOption: Sized {
  /// Writes the option into `parameters`.
  fn set<T: Transport>(&self, transport: &T, parameters: &T::Parameters) -> Result<()>;

  /// Reads the option back from `parameters`.
  fn get<T: Transport>(transport: &T, parameters: &T::Parameters) -> Result<Self>;

  /// Whether the option can only be changed before a connection exists.
  fn connection_time_only() -> bool {
    true
  }
}

/// `SO_REUSEADDR`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReuseAddress(pub bool);

/// `SO_KEEPALIVE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAlive(pub bool);

/// `TCP_NODELAY`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoDelay(pub bool);

/// `SO_RCVBUF`. Not supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveBufferSize(pub usize);

/// `SO_SNDBUF`. Not supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendBufferSize(pub usize);

/// `SO_LINGER`. Not supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Linger(pub Option<Duration>);

impl SocketOption for ReuseAddress {
  fn set<T: Transport>(&self, transport: &T, parameters: &T::Parameters) -> Result<()> {
    transport.set_reuse_local_address(parameters, self.0);
    Ok(())
  }

  fn get<T: Transport>(transport: &T, parameters: &T::Parameters) -> Result<Self> {
    Ok(Self(transport.reuse_local_address(parameters)))
  }
}

impl SocketOption for KeepAlive {
  fn set<T: Transport>(&self, transport: &T, parameters: &T::Parameters) -> Result<()> {
    transport.set_keepalive(parameters, self.0);
    Ok(())
  }

  fn get<T: Transport>(transport: &T, parameters: &T::Parameters) -> Result<Self> {
    Ok(Self(transport.keepalive(parameters)))
  }
}

impl SocketOption for NoDelay {
  fn set<T: Transport>(&self, transport: &T, parameters: &T::Parameters) -> Result<()> {
    transport.set_no_delay(parameters, self.0);
    Ok(())
  }

  fn get<T: Transport>(transport: &T, parameters: &T::Parameters) -> Result<Self> {
    Ok(Self(transport.no_delay(parameters)))
  }
}

macro_rules! unsupported_option {
  ($($ty:ty),*) => {
    $(
      impl SocketOption for $ty {
        fn set<T: Transport>(&self, _: &T, _: &T::Parameters) -> Result<()> {
          Err(Error::OperationNotSupported)
        }

        fn get<T: Transport>(_: &T, _: &T::Parameters) -> Result<Self> {
          Err(Error::OperationNotSupported)
        }

        fn connection_time_only() -> bool {
          false
        }
      }
    )*
  };
}

unsupported_option!(ReceiveBufferSize, SendBufferSize, Linger);

/// Flags for send and receive. Only the empty set is supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags(u32);

impl MessageFlags {
  pub const NONE: Self = Self(0);
  pub const PEEK: Self = Self(1 << 0);
  pub const OUT_OF_BAND: Self = Self(1 << 1);
  pub const DO_NOT_ROUTE: Self = Self(1 << 2);
  pub const END_OF_RECORD: Self = Self(1 << 3);

  pub const fn is_empty(self) -> bool {
    self.0 == 0
  }

  pub const fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }

  pub(crate) fn check(self) -> Result<()> {
    if self.is_empty() { Ok(()) } else { Err(Error::OperationNotSupported) }
  }
}

impl BitOr for MessageFlags {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    Self(self.0 | rhs.0)
  }
}

/// Which direction [`shutdown`](crate::service::SocketService::shutdown_socket) closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
  Read,
  Write,
  Both,
}

/// Readiness condition for `wait`. Never supported by this backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitType {
  Read,
  Write,
  Error,
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::native::{SocketKind, loopback::Loopback};

  #[test]
  fn flags() {
    let flags = MessageFlags::PEEK | MessageFlags::DO_NOT_ROUTE;
    assert!(flags.contains(MessageFlags::PEEK));
    assert!(!flags.contains(MessageFlags::OUT_OF_BAND));
    assert_eq!(flags.check(), Err(Error::OperationNotSupported));
    assert_eq!(MessageFlags::NONE.check(), Ok(()));
  }

  #[test]
  fn options_round_trip_through_parameters() {
    let net = Loopback::new().unwrap();
    let params = net.create_parameters(SocketKind::Stream);
    let params = params.as_ref().unwrap();

    assert_eq!(NoDelay::get(&net, params), Ok(NoDelay(false)));
    NoDelay(true).set(&net, params).unwrap();
    KeepAlive(true).set(&net, params).unwrap();
    assert_eq!(NoDelay::get(&net, params), Ok(NoDelay(true)));
    assert_eq!(KeepAlive::get(&net, params), Ok(KeepAlive(true)));
    assert_eq!(ReuseAddress::get(&net, params), Ok(ReuseAddress(false)));
  }

  #[test]
  fn buffer_sizes_are_unsupported() {
    let net = Loopback::new().unwrap();
    let params = net.create_parameters(SocketKind::Datagram);
    let params = params.as_ref().unwrap();

    assert_eq!(ReceiveBufferSize(4096).set(&net, params), Err(Error::OperationNotSupported));
    assert_eq!(SendBufferSize::get(&net, params), Err(Error::OperationNotSupported));
    assert_eq!(Linger::get(&net, params), Err(Error::OperationNotSupported));
  }
}
