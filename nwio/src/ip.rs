//! TCP and UDP over IPv4 and IPv6.

use std::{fmt, hash, marker::PhantomData, net::SocketAddr};

use crate::{
  endpoint::{Endpoint, Protocol},
  handle::NwPtr,
  native::Transport,
};

/// An IP protocol whose family follows from the address in use.
pub trait IpProtocol: Protocol + Copy {
  fn v4() -> Self;
  fn v6() -> Self;

  fn for_addr(addr: &SocketAddr) -> Self {
    match addr {
      SocketAddr::V4(_) => Self::v4(),
      SocketAddr::V6(_) => Self::v6(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tcp {
  family: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Udp {
  family: i32,
}

impl IpProtocol for Tcp {
  fn v4() -> Self {
    Tcp { family: libc::AF_INET }
  }

  fn v6() -> Self {
    Tcp { family: libc::AF_INET6 }
  }
}

impl IpProtocol for Udp {
  fn v4() -> Self {
    Udp { family: libc::AF_INET }
  }

  fn v6() -> Self {
    Udp { family: libc::AF_INET6 }
  }
}

impl Tcp {
  pub fn v4() -> Self {
    <Self as IpProtocol>::v4()
  }

  pub fn v6() -> Self {
    <Self as IpProtocol>::v6()
  }
}

impl Udp {
  pub fn v4() -> Self {
    <Self as IpProtocol>::v4()
  }

  pub fn v6() -> Self {
    <Self as IpProtocol>::v6()
  }
}

impl Protocol for Tcp {
  fn family(&self) -> i32 {
    self.family
  }

  fn socket_type(&self) -> i32 {
    libc::SOCK_STREAM
  }

  fn protocol(&self) -> i32 {
    libc::IPPROTO_TCP
  }
}

impl Protocol for Udp {
  fn family(&self) -> i32 {
    self.family
  }

  fn socket_type(&self) -> i32 {
    libc::SOCK_DGRAM
  }

  fn protocol(&self) -> i32 {
    libc::IPPROTO_UDP
  }
}

/// A socket address tagged with its protocol.
pub struct IpEndpoint<P> {
  addr: SocketAddr,
  _protocol: PhantomData<P>,
}

pub type TcpEndpoint = IpEndpoint<Tcp>;
pub type UdpEndpoint = IpEndpoint<Udp>;

impl<P> IpEndpoint<P> {
  pub const fn new(addr: SocketAddr) -> Self {
    Self { addr, _protocol: PhantomData }
  }

  pub fn addr(&self) -> SocketAddr {
    self.addr
  }
}

impl<P> From<SocketAddr> for IpEndpoint<P> {
  fn from(addr: SocketAddr) -> Self {
    Self::new(addr)
  }
}

impl<P> Clone for IpEndpoint<P> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<P> Copy for IpEndpoint<P> {}

impl<P> PartialEq for IpEndpoint<P> {
  fn eq(&self, other: &Self) -> bool {
    self.addr == other.addr
  }
}

impl<P> Eq for IpEndpoint<P> {}

impl<P> hash::Hash for IpEndpoint<P> {
  fn hash<H: hash::Hasher>(&self, state: &mut H) {
    self.addr.hash(state);
  }
}

impl<P> fmt::Debug for IpEndpoint<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "IpEndpoint({})", self.addr)
  }
}

impl<T: Transport, P: IpProtocol> Endpoint<T> for IpEndpoint<P> {
  type Protocol = P;

  fn protocol(&self) -> P {
    P::for_addr(&self.addr)
  }

  fn create_native(&self, transport: &T) -> NwPtr<T::Endpoint> {
    transport.create_endpoint(self.addr)
  }
}
