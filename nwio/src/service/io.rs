use std::sync::Arc;

use crate::{
  buffer::{self, ConstBuffers, MutBuffers},
  error::{BufResult, Error, Result},
  executor::Executor,
  handle::NwPtr,
  native::{Received, SocketKind, Transport},
  op::{AsyncOp, Handler},
  option::{MessageFlags, Shutdown},
};

use super::{SocketImpl, SocketService, record::IoHandles};

/// What one native receive produced.
struct Delivered<D: crate::handle::NativeObject> {
  content: NwPtr<D>,
  is_complete: bool,
}

fn delivered<D: crate::handle::NativeObject>(received: Received<D>) -> Result<Delivered<D>> {
  match received.error {
    Some(err) => Err(err.into()),
    None => Ok(Delivered { content: received.content, is_complete: received.is_complete }),
  }
}

/// Copies a receive into `buffers` and decides the byte count. An empty,
/// complete delivery on a stream is the peer closing its side.
fn settle_receive<T, B>(
  transport: &T,
  kind: SocketKind,
  delivered: Delivered<T::Data>,
  buffers: &mut B,
) -> Result<usize>
where
  T: Transport,
  B: MutBuffers + ?Sized,
{
  let copied = match delivered.content.as_ref() {
    Some(data) if transport.data_size(data) > 0 => buffer::scatter(transport, data, buffers),
    _ if kind == SocketKind::Stream && delivered.is_complete => return Err(Error::Eof),
    _ => 0,
  };
  Ok(copied)
}

/// Receive size asked of the transport.
fn receive_size(handles: &IoHandles<impl Transport>, capacity: usize) -> usize {
  if handles.max_receive_size != 0 { handles.max_receive_size } else { capacity }
}

impl<T: Transport> SocketService<T> {
  /// Sends `buffers` and blocks until the transport accepted them.
  pub fn send<B>(&self, socket: &SocketImpl<T>, buffers: &B, flags: MessageFlags) -> Result<usize>
  where
    B: ConstBuffers + ?Sized,
  {
    flags.check()?;
    let transport = &self.inner.transport;
    let handles = socket.record.io_handles(transport)?;
    let size = buffers.total_size();
    if size == 0 && handles.kind == SocketKind::Stream {
      return Ok(0);
    }

    let data = buffer::gather(&**transport, buffers);
    let (op, blocked) = self.blocking_op::<usize>()?;
    op.register(&socket.record.pending);
    self.start_send(&handles, data, size, &op);
    blocked.wait()
  }

  /// Starts sending `buffers`. `handler` gets the byte count and the buffers
  /// back.
  pub fn async_send<B, X, H>(
    &self,
    socket: &SocketImpl<T>,
    buffers: B,
    flags: MessageFlags,
    executor: &X,
    handler: H,
  ) where
    B: ConstBuffers + Send + 'static,
    X: Executor + Clone,
    H: Handler<BufResult<usize, B>>,
  {
    let transport = self.inner.transport.clone();
    let prepared = flags.check().and_then(|()| socket.record.io_handles(&transport));
    let size = buffers.total_size();
    // Gather now: the native object holds its own copy of the bytes.
    let data = match &prepared {
      Ok(handles) if size > 0 || handles.kind == SocketKind::Datagram => {
        buffer::gather(&*transport, &buffers)
      }
      _ => NwPtr::null(),
    };

    let Some(op) = self.posted_op(executor, handler, move |result| (result, buffers)) else {
      return;
    };
    match prepared {
      Err(err) => {
        op.complete(Err(err));
      }
      Ok(handles) if size == 0 && handles.kind == SocketKind::Stream => {
        op.complete(Ok(0));
      }
      Ok(handles) => {
        op.register(&socket.record.pending);
        self.start_send(&handles, data, size, &op);
      }
    }
  }

  fn start_send(
    &self,
    handles: &IoHandles<T>,
    data: NwPtr<T::Data>,
    size: usize,
    op: &Arc<AsyncOp<usize>>,
  ) {
    let Some(connection) = handles.connection.as_ref() else {
      op.complete(Err(Error::NotConnected));
      return;
    };
    let completer = op.completer();
    let is_complete = handles.kind == SocketKind::Datagram;
    tracing::trace!(size, "send started");
    self.inner.transport.send(
      connection,
      data.as_ref(),
      is_complete,
      Box::new(move |error| {
        completer.complete(match error {
          Some(err) => Err(err.into()),
          None => Ok(size),
        })
      }),
    );
  }

  /// Receives into `buffers`, blocking until something arrives. Datagram
  /// sockets read one whole datagram and drop what does not fit.
  pub fn receive<B>(
    &self,
    socket: &SocketImpl<T>,
    buffers: &mut B,
    flags: MessageFlags,
  ) -> Result<usize>
  where
    B: MutBuffers + ?Sized,
  {
    flags.check()?;
    let transport = &self.inner.transport;
    let handles = socket.record.io_handles(transport)?;
    let capacity = buffers.total_capacity();
    if capacity == 0 && handles.kind == SocketKind::Stream {
      return Ok(0);
    }

    let (op, blocked) = self.blocking_op::<Delivered<T::Data>>()?;
    op.register_receive(&socket.record.pending);
    self.start_receive(&handles, receive_size(&handles, capacity), &op);
    let delivered = blocked.wait()?;
    settle_receive(&**transport, handles.kind, delivered, buffers)
  }

  /// Starts a receive into `buffers`. The bytes are copied in on the
  /// completing thread; `handler` gets the count and the buffers back.
  pub fn async_receive<B, X, H>(
    &self,
    socket: &SocketImpl<T>,
    mut buffers: B,
    flags: MessageFlags,
    executor: &X,
    handler: H,
  ) where
    B: MutBuffers + Send + 'static,
    X: Executor + Clone,
    H: Handler<BufResult<usize, B>>,
  {
    let transport = self.inner.transport.clone();
    let prepared = flags.check().and_then(|()| socket.record.io_handles(&transport));
    let capacity = buffers.total_capacity();
    let kind = prepared.as_ref().map(|handles| handles.kind).unwrap_or(SocketKind::Stream);

    let convert = move |result: Result<Delivered<T::Data>>| {
      let result =
        result.and_then(|delivered| settle_receive(&*transport, kind, delivered, &mut buffers));
      (result, buffers)
    };
    let Some(op) = self.posted_op(executor, handler, convert) else {
      return;
    };

    match prepared {
      Err(err) => {
        op.complete(Err(err));
      }
      Ok(handles) if capacity == 0 && handles.kind == SocketKind::Stream => {
        op.complete(Ok(Delivered { content: NwPtr::null(), is_complete: false }));
      }
      Ok(handles) => {
        op.register_receive(&socket.record.pending);
        self.start_receive(&handles, receive_size(&handles, capacity), &op);
      }
    }
  }

  fn start_receive(
    &self,
    handles: &IoHandles<T>,
    max: usize,
    op: &Arc<AsyncOp<Delivered<T::Data>>>,
  ) {
    let Some(connection) = handles.connection.as_ref() else {
      op.complete(Err(Error::NotConnected));
      return;
    };
    let completer = op.completer();
    tracing::trace!(max, "receive started");
    self.inner.transport.receive(
      connection,
      1,
      max,
      Box::new(move |received| completer.complete(delivered(received))),
    );
  }

  /// Shuts down part of a connection. Closing the write side sends a final
  /// empty message; the read side has no native counterpart and is left as
  /// it is.
  pub fn shutdown_socket(&self, socket: &SocketImpl<T>, what: Shutdown) -> Result<()> {
    let handles = socket.record.io_handles(&self.inner.transport)?;
    if what == Shutdown::Read {
      return Ok(());
    }
    let Some(connection) = handles.connection.as_ref() else {
      return Err(Error::NotConnected);
    };

    let (op, blocked) = self.blocking_op::<()>()?;
    op.register(&socket.record.pending);
    let completer = op.completer();
    self.inner.transport.send(
      connection,
      None,
      true,
      Box::new(move |error| {
        completer.complete(match error {
          Some(err) => Err(err.into()),
          None => Ok(()),
        })
      }),
    );
    let result = blocked.wait();
    tracing::debug!(key = ?socket.key, ?what, ok = result.is_ok(), "socket shut down");
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    executor::Scheduler,
    ip::{Tcp, TcpEndpoint, Udp, UdpEndpoint},
    native::loopback::{Loopback, PeerEvent},
    sync::Mutex,
  };
  use std::{net::SocketAddr, time::Duration};

  const WAIT: Duration = Duration::from_secs(5);

  fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
  }

  #[test]
  fn io_needs_a_connection() {
    let service = SocketService::new(Loopback::new().unwrap());
    let socket = service.construct();
    let mut buf = vec![0u8; 8];

    let data = b"x".as_slice();
    assert_eq!(service.send(&socket, data, MessageFlags::NONE), Err(Error::BadDescriptor));
    service.open(&socket, &Tcp::v4()).unwrap();
    assert_eq!(service.send(&socket, data, MessageFlags::NONE), Err(Error::NotConnected));
    assert_eq!(service.receive(&socket, &mut buf, MessageFlags::NONE), Err(Error::NotConnected));
    assert_eq!(service.shutdown_socket(&socket, Shutdown::Both), Err(Error::NotConnected));
  }

  #[test]
  fn flags_are_not_supported() {
    let net = Loopback::new().unwrap();
    let peer = net.listen(addr(7401)).unwrap();
    let service = SocketService::new(net);
    let socket = service.construct();
    service.open(&socket, &Tcp::v4()).unwrap();
    service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();

    let mut buf = [0u8; 4];
    let sent = service.send(&socket, b"x".as_slice(), MessageFlags::OUT_OF_BAND);
    assert_eq!(sent, Err(Error::OperationNotSupported));
    let received = service.receive(&socket, &mut buf, MessageFlags::PEEK);
    assert_eq!(received, Err(Error::OperationNotSupported));
  }

  #[test]
  fn stream_round_trip() {
    let net = Loopback::new().unwrap();
    let peer = net.listen(addr(7402)).unwrap();
    let service = SocketService::new(net);
    let socket = service.construct();
    service.open(&socket, &Tcp::v4()).unwrap();
    service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();
    let far = peer.accept_timeout(WAIT).unwrap();

    let parts = vec![b"hel".to_vec(), b"lo".to_vec()];
    assert_eq!(service.send(&socket, &parts, MessageFlags::NONE), Ok(5));
    assert_eq!(far.read_timeout(5, WAIT), b"hello");

    far.send(b"world");
    let mut buf = vec![0u8; 16];
    let n = service.receive(&socket, &mut buf, MessageFlags::NONE).unwrap();
    assert_eq!(&buf[..n], b"world");

    far.close();
    assert_eq!(service.receive(&socket, &mut buf, MessageFlags::NONE), Err(Error::Eof));
  }

  #[test]
  fn zero_sized_stream_io_skips_the_transport() {
    let net = Loopback::new().unwrap();
    let peer = net.listen(addr(7403)).unwrap();
    let service = SocketService::new(net);
    let socket = service.construct();
    service.open(&socket, &Tcp::v4()).unwrap();
    service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();
    let far = peer.accept_timeout(WAIT).unwrap();

    let mut empty: [u8; 0] = [];
    assert_eq!(service.receive(&socket, &mut empty, MessageFlags::NONE), Ok(0));
    assert_eq!(service.send(&socket, &Vec::<u8>::new(), MessageFlags::NONE), Ok(0));
    assert_eq!(far.recv_timeout(Duration::from_millis(50)), None);
  }

  #[test]
  fn shutdown_write_sends_final_message() {
    let net = Loopback::new().unwrap();
    let peer = net.listen(addr(7404)).unwrap();
    let service = SocketService::new(net);
    let socket = service.construct();
    service.open(&socket, &Tcp::v4()).unwrap();
    service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();
    let far = peer.accept_timeout(WAIT).unwrap();

    service.shutdown_socket(&socket, Shutdown::Read).unwrap();
    service.shutdown_socket(&socket, Shutdown::Write).unwrap();
    assert_eq!(far.recv_timeout(WAIT), Some(PeerEvent::Finished));

    let err = service.send(&socket, b"late".as_slice(), MessageFlags::NONE).unwrap_err();
    assert_eq!(err, Error::from(crate::error::NativeError::posix(libc::EPIPE)));
  }

  #[test]
  fn datagram_receive_discards_excess() {
    let net = Loopback::new().unwrap();
    let peer = net.listen(addr(7405)).unwrap();
    let service = SocketService::new(net);
    let socket = service.construct();
    service.open(&socket, &Udp::v4()).unwrap();
    service.connect(&socket, &UdpEndpoint::new(peer.addr())).unwrap();
    let far = peer.accept_timeout(WAIT).unwrap();

    far.send(&[1u8; 100]);
    far.send(&[2u8; 3]);
    let mut small = [0u8; 10];
    assert_eq!(service.receive(&socket, &mut small, MessageFlags::NONE), Ok(10));
    assert_eq!(small, [1u8; 10]);
    assert_eq!(service.receive(&socket, &mut small, MessageFlags::NONE), Ok(3));
    assert_eq!(&small[..3], &[2u8; 3]);
  }

  #[test]
  fn async_send_and_receive_hand_buffers_back() {
    let net = Loopback::new().unwrap();
    let peer = net.listen(addr(7406)).unwrap();
    let service = SocketService::new(net);
    let socket = service.construct();
    service.open(&socket, &Tcp::v4()).unwrap();
    service.connect(&socket, &TcpEndpoint::new(peer.addr())).unwrap();
    let far = peer.accept_timeout(WAIT).unwrap();

    let scheduler = Scheduler::new();
    let sent = Arc::new(Mutex::new(None));
    let received = Arc::new(Mutex::new(None));

    let s = sent.clone();
    service.async_send(
      &socket,
      b"abc".to_vec(),
      MessageFlags::NONE,
      &scheduler.handle(),
      move |(res, buf): BufResult<usize, Vec<u8>>| *s.lock() = Some((res, buf)),
    );
    let r = received.clone();
    service.async_receive(
      &socket,
      vec![0u8; 2],
      MessageFlags::NONE,
      &scheduler.handle(),
      move |(res, buf): BufResult<usize, Vec<u8>>| *r.lock() = Some((res, buf)),
    );
    far.send(b"xyz");

    assert!(scheduler.run_until(WAIT, || sent.lock().is_some() && received.lock().is_some()));
    assert_eq!(*sent.lock(), Some((Ok(3), b"abc".to_vec())));
    assert_eq!(*received.lock(), Some((Ok(2), b"xy".to_vec())));
    assert_eq!(far.read_timeout(3, WAIT), b"abc");
    assert_eq!(service.outstanding_operations(), 0);
  }
}
