mod common;

use std::{
  sync::{Arc, Mutex},
  thread,
};

use common::*;
use nwio::{
  BufResult, Error, Result, SocketService,
  endpoint::{GenericEndpoint, GenericProtocol},
  executor::Scheduler,
  ip::{Tcp, TcpEndpoint, Udp, UdpEndpoint},
  native::loopback::Loopback,
  option::{KeepAlive, MessageFlags, NoDelay, ReuseAddress},
};

#[test]
fn shutdown_drains_before_returning() {
  let (net, service) = setup();
  let (socket, _peer, _far) = tcp_pair(&net, &service, 8201);
  let scheduler = Scheduler::new();
  let delivered = Arc::new(Mutex::new(Vec::new()));

  for _ in 0..3 {
    let d = delivered.clone();
    service.async_receive(
      &socket,
      vec![0u8; 8],
      MessageFlags::NONE,
      &scheduler.handle(),
      move |(res, _): BufResult<usize, Vec<u8>>| d.lock().unwrap().push(res),
    );
  }
  assert_eq!(service.outstanding_operations(), 3);

  let s = service.clone();
  thread::spawn(move || s.shutdown()).join().unwrap();

  // Every completion is queued by the time shutdown returns.
  assert_eq!(service.outstanding_operations(), 0);
  assert_eq!(scheduler.pending(), 3);
  assert!(!service.is_open(&socket));
  assert_eq!(scheduler.poll(), 3);
  assert_eq!(*delivered.lock().unwrap(), vec![Err(Error::OperationAborted); 3]);
}

#[test]
fn operations_after_shutdown_are_refused() {
  let (_net, service) = setup();
  service.shutdown();

  let socket = service.construct();
  service.open(&socket, &Tcp::v4()).unwrap();
  let scheduler = Scheduler::new();
  let outcome = Arc::new(Mutex::new(None));

  let o = outcome.clone();
  let endpoint = TcpEndpoint::new(localhost(8202));
  service.async_connect(&socket, &endpoint, &scheduler.handle(), move |res: Result<()>| {
    *o.lock().unwrap() = Some(res)
  });
  assert_eq!(scheduler.poll(), 1);
  assert_eq!(*outcome.lock().unwrap(), Some(Err(Error::ServiceShutdown)));

  let mut buf = [0u8; 4];
  assert_eq!(service.receive(&socket, &mut buf, MessageFlags::NONE), Err(Error::NotConnected));
}

#[test]
fn dropped_sockets_release_every_native_object() {
  let (net, service) = setup();
  {
    let (socket, _peer, far) = tcp_pair(&net, &service, 8203);
    far.send(b"abc");
    let mut buf = [0u8; 3];
    assert_eq!(service.receive(&socket, &mut buf, MessageFlags::NONE), Ok(3));
    let pieces = vec![b"x".to_vec(), b"y".to_vec()];
    assert_eq!(service.send(&socket, &pieces, MessageFlags::NONE), Ok(2));

    let udp = service.construct();
    service.open(&udp, &Udp::v6()).unwrap();
    assert!(net.live_objects().total() > 0);
  }
  service.shutdown();
  assert!(net.flush(WAIT));
  assert_eq!(net.live_objects().total(), 0);
}

#[test]
fn generic_endpoints_compare_by_address_and_protocol() {
  let net = Loopback::new().unwrap();
  let a = GenericEndpoint::new(&net, &TcpEndpoint::new(localhost(8204)));
  let b = GenericEndpoint::new(&net, &TcpEndpoint::new(localhost(8204)));
  let udp = GenericEndpoint::new(&net, &UdpEndpoint::new(localhost(8204)));

  assert_eq!(a.protocol(), GenericProtocol::of(&Tcp::v4()));
  assert_eq!(a, b);
  assert_ne!(a, udp);
  assert_eq!(a, a.clone());
}

#[test]
fn options_follow_the_parameters() {
  let (net, service) = setup();
  let peer = net.listen(localhost(8205)).unwrap();
  let socket = service.construct();
  service.open(&socket, &Tcp::v4()).unwrap();

  service.set_option(&socket, &ReuseAddress(true)).unwrap();
  service.set_option(&socket, &KeepAlive(true)).unwrap();
  service.set_option(&socket, &NoDelay(true)).unwrap();
  service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();

  assert_eq!(service.set_option(&socket, &ReuseAddress(false)), Err(Error::AlreadyConnected));
  assert_eq!(service.get_option::<ReuseAddress>(&socket), Ok(ReuseAddress(true)));
  assert_eq!(service.get_option::<KeepAlive>(&socket), Ok(KeepAlive(true)));
  assert_eq!(service.get_option::<NoDelay>(&socket), Ok(NoDelay(true)));
}

#[test]
fn sockets_move_between_services() {
  let (net, first) = setup();
  let second = SocketService::new(net.clone());
  let (mut source, _peer, far) = tcp_pair(&net, &second, 8206);
  let mut target = first.construct();

  first.move_assign(&mut target, &second, &mut source);
  assert!(!second.is_open(&source));
  let remote = second.remote_endpoint(&target).unwrap();
  assert_eq!(remote.as_ref().map(|e| e.addr()), Some(localhost(8206)));

  far.send(b"hi");
  let mut buf = [0u8; 2];
  assert_eq!(second.receive(&target, &mut buf, MessageFlags::NONE), Ok(2));
  assert_eq!(&buf, b"hi");
}
