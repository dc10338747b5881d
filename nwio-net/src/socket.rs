use std::{io, net::SocketAddr};

use nwio::{
  BufResult, Handler, SocketImpl, SocketService,
  buffer::{ConstBuffers, MutBuffers},
  endpoint::{Endpoint, Protocol},
  executor::Executor,
  native::Transport,
  option::{MessageFlags, Shutdown, SocketOption},
};

/// An open socket together with the service that owns it. Dropping it closes
/// the socket.
pub struct Socket<T: Transport> {
  service: SocketService<T>,
  inner: SocketImpl<T>,
}

impl<T: Transport> Socket<T> {
  pub fn new<P: Protocol>(service: &SocketService<T>, protocol: &P) -> io::Result<Self> {
    let inner = service.construct();
    service.open(&inner, protocol)?;
    Ok(Socket { service: service.clone(), inner })
  }

  pub fn service(&self) -> &SocketService<T> {
    &self.service
  }

  pub fn as_impl(&self) -> &SocketImpl<T> {
    &self.inner
  }

  pub fn bind<E: Endpoint<T>>(&self, endpoint: &E) -> io::Result<()> {
    Ok(self.service.bind(&self.inner, endpoint)?)
  }

  pub fn connect<E: Endpoint<T>>(&self, endpoint: &E) -> io::Result<()> {
    Ok(self.service.connect(&self.inner, endpoint)?)
  }

  pub fn set_option<O: SocketOption>(&self, option: O) -> io::Result<()> {
    Ok(self.service.set_option(&self.inner, &option)?)
  }

  pub fn option<O: SocketOption>(&self) -> io::Result<O> {
    Ok(self.service.get_option(&self.inner)?)
  }

  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    let endpoint = self.service.local_endpoint(&self.inner)?;
    self.address_of(endpoint.as_ref())
  }

  pub fn peer_addr(&self) -> io::Result<SocketAddr> {
    let endpoint = self.service.remote_endpoint(&self.inner)?;
    self.address_of(endpoint.as_ref())
  }

  fn address_of(&self, endpoint: Option<&T::Endpoint>) -> io::Result<SocketAddr> {
    endpoint
      .and_then(|endpoint| self.service.transport().endpoint_address(endpoint))
      .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "endpoint has no address"))
  }

  pub fn send<B: ConstBuffers + ?Sized>(&self, buffers: &B) -> io::Result<usize> {
    Ok(self.service.send(&self.inner, buffers, MessageFlags::NONE)?)
  }

  pub fn recv<B: MutBuffers + ?Sized>(&self, buffers: &mut B) -> io::Result<usize> {
    Ok(self.service.receive(&self.inner, buffers, MessageFlags::NONE)?)
  }

  pub fn async_send<B, X, H>(&self, buffers: B, executor: &X, handler: H)
  where
    B: ConstBuffers + Send + 'static,
    X: Executor + Clone,
    H: Handler<BufResult<usize, B>>,
  {
    self.service.async_send(&self.inner, buffers, MessageFlags::NONE, executor, handler)
  }

  pub fn async_recv<B, X, H>(&self, buffers: B, executor: &X, handler: H)
  where
    B: MutBuffers + Send + 'static,
    X: Executor + Clone,
    H: Handler<BufResult<usize, B>>,
  {
    self.service.async_receive(&self.inner, buffers, MessageFlags::NONE, executor, handler)
  }

  pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
    Ok(self.service.shutdown_socket(&self.inner, how)?)
  }

  /// Aborts pending operations without closing.
  pub fn cancel(&self) -> io::Result<()> {
    Ok(self.service.cancel(&self.inner)?)
  }
}

impl<T: Transport> std::fmt::Debug for Socket<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Socket").field(&self.inner).finish()
  }
}
