mod common;

use std::{
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use common::*;
use nwio::{BufResult, Continuation, Error, executor::Scheduler, option::MessageFlags};

type Outcomes = Arc<std::sync::Mutex<Vec<BufResult<usize, Vec<u8>>>>>;

fn collector() -> (Outcomes, impl Fn() -> Box<dyn FnOnce(BufResult<usize, Vec<u8>>) + Send>) {
  let outcomes: Outcomes = Arc::default();
  let o = outcomes.clone();
  let make = move || {
    let o = o.clone();
    Box::new(move |res: BufResult<usize, Vec<u8>>| o.lock().unwrap().push(res))
      as Box<dyn FnOnce(BufResult<usize, Vec<u8>>) + Send>
  };
  (outcomes, make)
}

#[test]
fn completions_wait_for_the_executor() {
  let (net, service) = setup();
  let (socket, _peer, far) = tcp_pair(&net, &service, 8101);
  let scheduler = Scheduler::new();
  let (outcomes, handler) = collector();

  service.async_receive(&socket, vec![0u8; 8], MessageFlags::NONE, &scheduler.handle(), handler());
  service.async_send(&socket, b"out".to_vec(), MessageFlags::NONE, &scheduler.handle(), handler());
  far.send(b"in");
  assert!(net.flush(WAIT));

  // Both native completions have happened, neither handler has run.
  assert!(outcomes.lock().unwrap().is_empty());
  assert_eq!(scheduler.pending(), 2);
  assert_eq!(scheduler.poll(), 2);

  let outcomes = outcomes.lock().unwrap();
  assert_eq!(outcomes.len(), 2);
  assert!(outcomes.contains(&(Ok(2), b"in\0\0\0\0\0\0".to_vec())));
  assert!(outcomes.contains(&(Ok(3), b"out".to_vec())));
}

#[test]
fn precondition_failures_are_posted_too() {
  let (_net, service) = setup();
  let socket = service.construct();
  let scheduler = Scheduler::new();
  let (outcomes, handler) = collector();

  service.async_receive(&socket, vec![0u8; 4], MessageFlags::NONE, &scheduler.handle(), handler());
  service.async_send(&socket, vec![1u8; 4], MessageFlags::NONE, &scheduler.handle(), handler());
  assert!(outcomes.lock().unwrap().is_empty());

  scheduler.poll();
  let outcomes = outcomes.lock().unwrap();
  let expected = vec![
    (Err(Error::BadDescriptor), vec![0u8; 4]),
    (Err(Error::BadDescriptor), vec![1u8; 4]),
  ];
  assert_eq!(*outcomes, expected);
  assert_eq!(service.outstanding_operations(), 0);
}

#[test]
fn oversized_datagram_fills_the_buffer_and_drops_the_rest() {
  let (net, service) = setup();
  let (socket, _peer, far) = udp_pair(&net, &service, 8102);
  let scheduler = Scheduler::new();
  let (outcomes, handler) = collector();

  let datagram: Vec<u8> = (0..70_000u32).map(|i| i as u8).collect();
  far.send(&datagram);
  let buffer = vec![0u8; 1024];
  service.async_receive(&socket, buffer, MessageFlags::NONE, &scheduler.handle(), handler());

  assert!(scheduler.run_until(WAIT, || !outcomes.lock().unwrap().is_empty()));
  let (res, buf) = outcomes.lock().unwrap().pop().unwrap();
  assert_eq!(res, Ok(1024));
  assert_eq!(buf, datagram[..1024]);

  // The remainder went with the datagram.
  far.send(b"next");
  let mut small = [0u8; 16];
  assert_eq!(service.receive(&socket, &mut small, MessageFlags::NONE), Ok(4));
  assert_eq!(&small[..4], b"next");
}

#[test]
fn cancel_delivers_each_pending_receive_once() {
  let (net, service) = setup();
  let (socket, _peer, far) = tcp_pair(&net, &service, 8103);
  let scheduler = Scheduler::new();
  let (outcomes, handler) = collector();

  service.async_receive(&socket, vec![0u8; 4], MessageFlags::NONE, &scheduler.handle(), handler());
  service.async_receive(&socket, vec![0u8; 4], MessageFlags::NONE, &scheduler.handle(), handler());
  assert!(net.flush(WAIT));
  assert_eq!(service.outstanding_operations(), 2);

  service.cancel(&socket).unwrap();
  assert!(net.flush(WAIT));
  assert_eq!(service.outstanding_operations(), 0);

  assert_eq!(scheduler.poll(), 2);
  {
    let outcomes = outcomes.lock().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|(res, _)| *res == Err(Error::OperationAborted)));
  }
  assert!(service.is_open(&socket));

  // Bytes sent after the cancel are kept for the next reader.
  far.send(b"late");
  let mut buf = [0u8; 4];
  assert_eq!(service.receive(&socket, &mut buf, MessageFlags::NONE), Ok(4));
  assert_eq!(&buf, b"late");
  assert_eq!(scheduler.poll(), 0);
}

#[test]
fn receive_after_cancel_gets_the_next_bytes() {
  let (net, service) = setup();
  let (socket, _peer, far) = tcp_pair(&net, &service, 8107);
  let scheduler = Scheduler::new();
  let (outcomes, handler) = collector();

  service.async_receive(&socket, vec![0u8; 8], MessageFlags::NONE, &scheduler.handle(), handler());
  service.cancel(&socket).unwrap();
  service.async_receive(&socket, vec![0u8; 8], MessageFlags::NONE, &scheduler.handle(), handler());
  far.send(b"hello");

  assert!(scheduler.run_until(WAIT, || outcomes.lock().unwrap().len() == 2));
  let outcomes = outcomes.lock().unwrap();
  assert_eq!(outcomes[0], (Err(Error::OperationAborted), vec![0u8; 8]));
  assert_eq!(outcomes[1], (Ok(5), b"hello\0\0\0".to_vec()));
  assert_eq!(service.outstanding_operations(), 0);
}

#[test]
fn continuation_handlers_reach_the_executor() {
  let (net, service) = setup();
  let (socket, _peer, far) = tcp_pair(&net, &service, 8104);
  let scheduler = Scheduler::new();
  let hits = Arc::new(AtomicUsize::new(0));

  let h = hits.clone();
  service.async_receive(
    &socket,
    vec![0u8; 4],
    MessageFlags::NONE,
    &scheduler.handle(),
    Continuation(move |(res, _): BufResult<usize, Vec<u8>>| {
      assert_eq!(res, Ok(4));
      h.fetch_add(1, Ordering::SeqCst);
    }),
  );
  far.send(b"more");

  assert!(scheduler.run_one_timeout(WAIT));
  assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn close_aborts_and_tears_down() {
  let (net, service) = setup();
  let (socket, _peer, far) = tcp_pair(&net, &service, 8105);
  let scheduler = Scheduler::new();
  let (outcomes, handler) = collector();

  service.async_receive(&socket, vec![0u8; 4], MessageFlags::NONE, &scheduler.handle(), handler());
  service.close(&socket).unwrap();
  assert!(!service.is_open(&socket));

  assert!(scheduler.run_one_timeout(WAIT));
  assert_eq!(outcomes.lock().unwrap()[0].0, Err(Error::OperationAborted));
  // The peer sees the connection go away.
  assert_eq!(far.recv_timeout(Duration::from_millis(200)), None);
}

#[test]
fn reset_surfaces_on_send() {
  let (net, service) = setup();
  let (socket, _peer, far) = tcp_pair(&net, &service, 8106);

  far.reset();
  assert!(net.flush(WAIT));
  let err = service.send(&socket, b"x".as_slice(), MessageFlags::NONE).unwrap_err();
  assert_eq!(std::io::Error::from(err).raw_os_error(), Some(libc::ECONNRESET));
}
