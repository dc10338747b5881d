//! Protocols and endpoints.
//!
//! The service never looks inside an endpoint. It only needs a native
//! endpoint object to bind or connect to, and the protocol the endpoint
//! belongs to. [`Endpoint`] is that contract; [`GenericEndpoint`] erases the
//! concrete endpoint type, keeping the native object and a
//! [`GenericProtocol`].

use std::fmt;

use crate::{
  handle::NwPtr,
  native::{SocketKind, Transport},
};

/// Identifies a transport protocol by its socket triple.
pub trait Protocol: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
  /// Address family, an `AF_*` value.
  fn family(&self) -> i32;
  /// Socket type, a `SOCK_*` value.
  fn socket_type(&self) -> i32;
  /// Protocol number, an `IPPROTO_*` value or 0.
  fn protocol(&self) -> i32;

  fn kind(&self) -> Option<SocketKind> {
    kind_of(self.socket_type())
  }
}

fn kind_of(socket_type: i32) -> Option<SocketKind> {
  match socket_type {
    libc::SOCK_STREAM => Some(SocketKind::Stream),
    libc::SOCK_DGRAM => Some(SocketKind::Datagram),
    _ => None,
  }
}

/// Something a socket can bind or connect to.
pub trait Endpoint<T: Transport> {
  type Protocol: Protocol;

  fn protocol(&self) -> Self::Protocol;

  /// Returns a native endpoint object for this endpoint. The caller owns the
  /// returned reference.
  fn create_native(&self, transport: &T) -> NwPtr<T::Endpoint>;
}

/// A protocol known only by its numbers. All zeros means unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct GenericProtocol {
  family: i32,
  socket_type: i32,
  protocol: i32,
}

impl GenericProtocol {
  pub const fn new(family: i32, socket_type: i32, protocol: i32) -> Self {
    Self { family, socket_type, protocol }
  }

  pub fn of<P: Protocol>(protocol: &P) -> Self {
    Self::new(protocol.family(), protocol.socket_type(), protocol.protocol())
  }

  pub fn is_unset(&self) -> bool {
    *self == Self::default()
  }
}

impl Protocol for GenericProtocol {
  fn family(&self) -> i32 {
    self.family
  }

  fn socket_type(&self) -> i32 {
    self.socket_type
  }

  fn protocol(&self) -> i32 {
    self.protocol
  }
}

/// An endpoint of any protocol.
///
/// Holds the native endpoint object together with the protocol it was made
/// for. A default endpoint has neither, and an endpoint never has just one
/// of them. Two generic endpoints are equal when
/// their protocols are equal and their native objects are the same object or
/// compare equal.
pub struct GenericEndpoint<T: Transport> {
  endpoint: NwPtr<T::Endpoint>,
  protocol: GenericProtocol,
}

impl<T: Transport> GenericEndpoint<T> {
  /// Converts any endpoint, creating its native object on `transport`.
  pub fn new<E>(transport: &T, endpoint: &E) -> Self
  where
    E: Endpoint<T> + ?Sized,
  {
    Self::from_parts(endpoint.create_native(transport), GenericProtocol::of(&endpoint.protocol()))
  }

  /// Builds an endpoint from an existing native object, such as the one
  /// returned by a local or remote endpoint query. A missing object or an
  /// unset protocol gives the unset endpoint.
  pub fn from_parts(endpoint: NwPtr<T::Endpoint>, protocol: GenericProtocol) -> Self {
    if endpoint.is_none() || protocol.is_unset() {
      return Self::default();
    }
    Self { endpoint, protocol }
  }

  pub fn protocol(&self) -> GenericProtocol {
    self.protocol
  }

  pub fn native(&self) -> &NwPtr<T::Endpoint> {
    &self.endpoint
  }

  pub fn is_unset(&self) -> bool {
    self.endpoint.is_none() && self.protocol.is_unset()
  }
}

impl<T: Transport> Endpoint<T> for GenericEndpoint<T> {
  type Protocol = GenericProtocol;

  fn protocol(&self) -> GenericProtocol {
    self.protocol
  }

  fn create_native(&self, _transport: &T) -> NwPtr<T::Endpoint> {
    self.endpoint.clone()
  }
}

impl<T: Transport> Default for GenericEndpoint<T> {
  fn default() -> Self {
    Self { endpoint: NwPtr::null(), protocol: GenericProtocol::default() }
  }
}

impl<T: Transport> Clone for GenericEndpoint<T> {
  fn clone(&self) -> Self {
    Self { endpoint: self.endpoint.clone(), protocol: self.protocol }
  }
}

impl<T: Transport> PartialEq for GenericEndpoint<T> {
  fn eq(&self, other: &Self) -> bool {
    let same_endpoint = self.endpoint == other.endpoint
      || matches!(
        (self.endpoint.as_ref(), other.endpoint.as_ref()),
        (Some(a), Some(b)) if a == b
      );
    same_endpoint && self.protocol == other.protocol
  }
}

impl<T: Transport> fmt::Debug for GenericEndpoint<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GenericEndpoint")
      .field("endpoint", &self.endpoint)
      .field("protocol", &self.protocol)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    ip::{IpEndpoint, Tcp, Udp},
    native::loopback::Loopback,
  };
  use proptest::prelude::*;
  use std::net::SocketAddr;

  #[test]
  fn protocol_reads_back() {
    let net = Loopback::new().unwrap();
    let ep = IpEndpoint::<Tcp>::new("127.0.0.1:80".parse().unwrap());
    let generic = GenericEndpoint::new(&net, &ep);

    assert_eq!(generic.protocol(), GenericProtocol::of(&Tcp::v4()));
    assert_eq!(generic.protocol().kind(), Some(SocketKind::Stream));
    assert!(!generic.is_unset());
  }

  #[test]
  fn default_is_unset() {
    let ep = GenericEndpoint::<Loopback>::default();
    assert!(ep.is_unset());
    assert!(ep.native().is_none());
    assert_eq!(ep.protocol().kind(), None);
    assert_eq!(ep, GenericEndpoint::default());
  }

  #[test]
  fn half_set_parts_are_unset() {
    let net = Loopback::new().unwrap();
    let tcp = GenericProtocol::of(&Tcp::v4());
    let no_object = GenericEndpoint::<Loopback>::from_parts(NwPtr::null(), tcp);
    assert!(no_object.is_unset());
    assert_eq!(no_object.protocol(), GenericProtocol::default());

    let native = net.create_endpoint("127.0.0.1:80".parse().unwrap());
    let no_protocol = GenericEndpoint::<Loopback>::from_parts(native, GenericProtocol::default());
    assert!(no_protocol.is_unset());
    assert!(no_protocol.native().is_none());
    assert_eq!(net.live_objects().endpoints, 0);
  }

  struct Unresolvable;

  impl Endpoint<Loopback> for Unresolvable {
    type Protocol = Tcp;

    fn protocol(&self) -> Tcp {
      Tcp::v4()
    }

    fn create_native(&self, _transport: &Loopback) -> NwPtr<<Loopback as Transport>::Endpoint> {
      NwPtr::null()
    }
  }

  #[test]
  fn endpoint_without_native_object_converts_to_unset() {
    let net = Loopback::new().unwrap();
    let generic = GenericEndpoint::new(&net, &Unresolvable);
    assert!(generic.is_unset());
    assert_eq!(generic.protocol().kind(), None);
    assert_eq!(generic, GenericEndpoint::default());
  }

  #[test]
  fn copies_share_the_native_object() {
    let net = Loopback::new().unwrap();
    let ep = GenericEndpoint::new(&net, &IpEndpoint::<Udp>::new("[::1]:53".parse().unwrap()));
    let copy = ep.clone();
    assert_eq!(ep.native(), copy.native());
    assert_eq!(ep, copy);
    assert_eq!(net.live_objects().endpoints, 1);
  }

  #[test]
  fn generic_of_generic_is_the_same() {
    let net = Loopback::new().unwrap();
    let ep = GenericEndpoint::new(&net, &IpEndpoint::<Tcp>::new("10.0.0.1:443".parse().unwrap()));
    let again = GenericEndpoint::new(&net, &ep);
    assert_eq!(ep, again);
  }

  fn addr_strategy() -> impl Strategy<Value = SocketAddr> {
    (any::<[u8; 4]>(), any::<u16>()).prop_map(|(ip, port)| SocketAddr::from((ip, port)))
  }

  proptest! {
    #[test]
    fn equal_iff_same_address_and_protocol(a in addr_strategy(), b in addr_strategy()) {
      let net = Loopback::new().unwrap();
      let tcp_a = GenericEndpoint::new(&net, &IpEndpoint::<Tcp>::new(a));
      let tcp_a2 = GenericEndpoint::new(&net, &IpEndpoint::<Tcp>::new(a));
      let udp_a = GenericEndpoint::new(&net, &IpEndpoint::<Udp>::new(a));
      let tcp_b = GenericEndpoint::new(&net, &IpEndpoint::<Tcp>::new(b));

      prop_assert_eq!(&tcp_a, &tcp_a2);
      prop_assert_ne!(&tcp_a, &udp_a);
      prop_assert_eq!(tcp_a == tcp_b, a == b);
    }
  }
}
