//! TCP and UDP sockets over an [`nwio`] socket service.
//!
//! ```
//! use nwio::{SocketService, native::loopback::Loopback};
//! use nwio_net::TcpStream;
//! use std::{io::Write, time::Duration};
//!
//! let net = Loopback::new().unwrap();
//! let peer = net.listen("127.0.0.1:9100".parse().unwrap()).unwrap();
//! let service = SocketService::new(net);
//!
//! let mut stream = TcpStream::connect(&service, "127.0.0.1:9100").unwrap();
//! stream.write_all(b"hello").unwrap();
//!
//! let far = peer.accept_timeout(Duration::from_secs(5)).unwrap();
//! assert_eq!(far.read_timeout(5, Duration::from_secs(5)), b"hello");
//! ```

use std::{
  io::{self, Read, Write},
  net::{SocketAddr, ToSocketAddrs},
};

use nwio::{
  BufResult, Error, Handler, SocketService,
  executor::Executor,
  ip::{IpProtocol, Tcp, TcpEndpoint, Udp, UdpEndpoint},
  native::Transport,
  option::{NoDelay, Shutdown},
};

mod socket;
pub use socket::Socket;

/// Runs `f` for every resolved address until one succeeds.
fn each_addr<A, F, R>(addr: A, mut f: F) -> io::Result<R>
where
  A: ToSocketAddrs,
  F: FnMut(SocketAddr) -> io::Result<R>,
{
  let mut last = None;
  for value in addr.to_socket_addrs()? {
    match f(value) {
      Ok(out) => return Ok(out),
      Err(err) => last = Some(err),
    }
  }
  Err(last.unwrap_or_else(|| {
    io::Error::new(io::ErrorKind::InvalidInput, "could not resolve to any addresses")
  }))
}

pub struct TcpStream<T: Transport>(Socket<T>);

impl<T: Transport> From<Socket<T>> for TcpStream<T> {
  fn from(value: Socket<T>) -> Self {
    TcpStream(value)
  }
}

impl<T: Transport> TcpStream<T> {
  pub fn connect(service: &SocketService<T>, addr: impl ToSocketAddrs) -> io::Result<Self> {
    each_addr(addr, |value| {
      let socket = Socket::new(service, &Tcp::for_addr(&value))?;
      socket.connect(&TcpEndpoint::new(value))?;
      tracing::debug!(peer = %value, "tcp stream connected");
      Ok(TcpStream(socket))
    })
  }

  pub fn socket(&self) -> &Socket<T> {
    &self.0
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.0.local_addr()
  }

  pub fn peer_addr(&self) -> io::Result<SocketAddr> {
    self.0.peer_addr()
  }

  pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
    self.0.set_option(NoDelay(nodelay))
  }

  pub fn nodelay(&self) -> io::Result<bool> {
    Ok(self.0.option::<NoDelay>()?.0)
  }

  pub fn send<X, H>(&self, vec: Vec<u8>, executor: &X, handler: H)
  where
    X: Executor + Clone,
    H: Handler<BufResult<usize, Vec<u8>>>,
  {
    self.0.async_send(vec, executor, handler)
  }

  pub fn recv<X, H>(&self, vec: Vec<u8>, executor: &X, handler: H)
  where
    X: Executor + Clone,
    H: Handler<BufResult<usize, Vec<u8>>>,
  {
    self.0.async_recv(vec, executor, handler)
  }

  pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
    self.0.shutdown(how)
  }
}

impl<T: Transport> Read for TcpStream<T> {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    match self.0.service().receive(self.0.as_impl(), buf, Default::default()) {
      Err(Error::Eof) => Ok(0),
      other => Ok(other?),
    }
  }
}

impl<T: Transport> Write for TcpStream<T> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.send(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

impl<T: Transport> std::fmt::Debug for TcpStream<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("TcpStream").field(&self.0).finish()
  }
}

/// A UDP socket. Datagrams go to and come from the address given to
/// [`connect`](UdpSocket::connect).
pub struct UdpSocket<T: Transport>(Socket<T>);

impl<T: Transport> UdpSocket<T> {
  /// Opens a socket bound to `addr`.
  pub fn bind(service: &SocketService<T>, addr: impl ToSocketAddrs) -> io::Result<Self> {
    each_addr(addr, |value| {
      let socket = Socket::new(service, &Udp::for_addr(&value))?;
      socket.bind(&UdpEndpoint::new(value))?;
      Ok(UdpSocket(socket))
    })
  }

  /// Associates the socket with `addr`.
  pub fn connect(&self, addr: impl ToSocketAddrs) -> io::Result<()> {
    each_addr(addr, |value| self.0.connect(&UdpEndpoint::new(value)))
  }

  pub fn socket(&self) -> &Socket<T> {
    &self.0
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.0.local_addr()
  }

  pub fn peer_addr(&self) -> io::Result<SocketAddr> {
    self.0.peer_addr()
  }

  /// Sends one datagram.
  pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
    self.0.send(buf)
  }

  /// Receives one datagram. Whatever does not fit in `buf` is discarded.
  pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
    self.0.recv(buf)
  }

  pub fn send_async<X, H>(&self, vec: Vec<u8>, executor: &X, handler: H)
  where
    X: Executor + Clone,
    H: Handler<BufResult<usize, Vec<u8>>>,
  {
    self.0.async_send(vec, executor, handler)
  }

  pub fn recv_async<X, H>(&self, vec: Vec<u8>, executor: &X, handler: H)
  where
    X: Executor + Clone,
    H: Handler<BufResult<usize, Vec<u8>>>,
  {
    self.0.async_recv(vec, executor, handler)
  }
}

impl<T: Transport> std::fmt::Debug for UdpSocket<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("UdpSocket").field(&self.0).finish()
  }
}
