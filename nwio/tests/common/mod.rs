#![allow(dead_code)]

use std::{net::SocketAddr, sync::Once, time::Duration};

use nwio::{
  SocketImpl, SocketService,
  ip::{Tcp, TcpEndpoint, Udp, UdpEndpoint},
  native::loopback::{Loopback, Peer, PeerConnection},
};

pub const WAIT: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Routes `tracing` output through the test harness, once per binary.
pub fn init_tracing() {
  TRACING.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::TRACE)
      .with_test_writer()
      .try_init();
  });
}

pub fn localhost(port: u16) -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], port))
}

pub fn setup() -> (Loopback, SocketService<Loopback>) {
  init_tracing();
  let net = Loopback::new().unwrap();
  let service = SocketService::new(net.clone());
  (net, service)
}

/// A connected TCP socket and the peer side of its connection.
pub fn tcp_pair(
  net: &Loopback,
  service: &SocketService<Loopback>,
  port: u16,
) -> (SocketImpl<Loopback>, Peer, PeerConnection) {
  let peer = net.listen(localhost(port)).unwrap();
  let socket = service.construct();
  service.open(&socket, &Tcp::v4()).unwrap();
  service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();
  let far = peer.accept_timeout(WAIT).unwrap();
  (socket, peer, far)
}

/// A connected UDP socket and the peer side of its association.
pub fn udp_pair(
  net: &Loopback,
  service: &SocketService<Loopback>,
  port: u16,
) -> (SocketImpl<Loopback>, Peer, PeerConnection) {
  let peer = net.listen(localhost(port)).unwrap();
  let socket = service.construct();
  service.open(&socket, &Udp::v4()).unwrap();
  service.connect(&socket, &UdpEndpoint::new(peer.addr())).unwrap();
  let far = peer.accept_timeout(WAIT).unwrap();
  (socket, peer, far)
}
