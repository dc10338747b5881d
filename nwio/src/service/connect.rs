use std::sync::Arc;

use crate::{
  endpoint::Endpoint,
  error::{Error, NativeError, Result},
  executor::Executor,
  handle::NwPtr,
  native::{ConnectionState, StateHandler, Transport},
  op::{AsyncOp, Completer, Handler},
  option::SocketOption,
  sync::Mutex,
};

use super::{SocketImpl, SocketService, record::Record};

/// A connect in progress: the connection being established and what to do
/// once it settles.
struct Connecting<T: Transport> {
  transport: Arc<T>,
  record: Arc<Record<T>>,
  connection: NwPtr<T::Connection>,
}

impl<T: Transport> Connecting<T> {
  /// Tidies up after the connect settled. Failure tears the connection down
  /// and leaves the socket open but unconnected.
  fn settle(self, result: Result<()>) -> Result<()> {
    let Some(connection) = self.connection.as_ref() else {
      return result;
    };
    self.transport.set_state_changed_handler(connection, None);
    if result.is_err() {
      self.transport.cancel(connection);
      self.record.clear_connection(&self.connection);
    }
    match &result {
      Ok(()) => tracing::debug!("socket connected"),
      Err(err) => tracing::debug!(%err, "connect failed"),
    }
    result
  }
}

fn connect_outcome(state: ConnectionState) -> Option<Result<()>> {
  match state {
    ConnectionState::Ready => Some(Ok(())),
    ConnectionState::Waiting(err) | ConnectionState::Failed(err) => Some(Err(err.into())),
    ConnectionState::Cancelled => Some(Err(Error::OperationAborted)),
    ConnectionState::Preparing => None,
  }
}

impl<T: Transport> SocketService<T> {
  /// Sets the local endpoint the connection will use.
  pub fn bind<E: Endpoint<T>>(&self, socket: &SocketImpl<T>, endpoint: &E) -> Result<()> {
    let parameters = socket.record.unconnected_parameters()?;
    let native = endpoint.create_native(&self.inner.transport);
    let (Some(parameters), Some(native)) = (parameters.as_ref(), native.as_ref()) else {
      return Err(NativeError::posix(libc::EINVAL).into());
    };
    self.inner.transport.set_local_endpoint(parameters, Some(native));
    tracing::trace!(key = ?socket.key, "socket bound");
    Ok(())
  }

  /// Creates the connection and starts it. The connection is stored in the
  /// record first, so closing the socket meanwhile tears it down.
  fn start_connect<E: Endpoint<T>>(
    &self,
    socket: &SocketImpl<T>,
    endpoint: &E,
    op: &Arc<AsyncOp<()>>,
  ) -> Result<()> {
    let transport = &self.inner.transport;
    let parameters = socket.record.unconnected_parameters()?;
    let native = endpoint.create_native(transport);
    let (Some(parameters), Some(native)) = (parameters.as_ref(), native.as_ref()) else {
      return Err(NativeError::posix(libc::EINVAL).into());
    };

    let connection = transport.create_connection(native, parameters);
    let Some(conn) = connection.as_ref() else {
      return Err(NativeError::posix(libc::ENOMEM).into());
    };
    socket.record.install_connection(&connection)?;

    op.register(&socket.record.pending);
    let connecting = Connecting {
      transport: transport.clone(),
      record: socket.record.clone(),
      connection: connection.clone(),
    };
    let waiting: Mutex<Option<(Completer<()>, Connecting<T>)>> =
      Mutex::new(Some((op.completer(), connecting)));

    let handler: StateHandler = Arc::new(move |state: ConnectionState| {
      let Some(result) = connect_outcome(state) else {
        tracing::trace!(?state, "connection state changed");
        return;
      };
      let settled = waiting.lock().take();
      if let Some((completer, connecting)) = settled {
        if completer.is_finished() {
          // Cancelled while connecting.
          connecting.settle(Err(Error::OperationAborted));
        } else {
          completer.complete(connecting.settle(result));
        }
      }
    });
    transport.set_state_changed_handler(conn, Some(handler));
    tracing::trace!(key = ?socket.key, "connect started");
    transport.start(conn);
    Ok(())
  }

  /// Connects and blocks until the connection is ready or has failed.
  pub fn connect<E: Endpoint<T>>(&self, socket: &SocketImpl<T>, endpoint: &E) -> Result<()> {
    let (op, blocked) = self.blocking_op::<()>()?;
    if let Err(err) = self.start_connect(socket, endpoint, &op) {
      op.complete(Err(err));
    }
    blocked.wait()
  }

  /// Starts a connect; `handler` gets the outcome.
  pub fn async_connect<E, X, H>(
    &self,
    socket: &SocketImpl<T>,
    endpoint: &E,
    executor: &X,
    handler: H,
  ) where
    E: Endpoint<T>,
    X: Executor + Clone,
    H: Handler<Result<()>>,
  {
    let Some(op) = self.posted_op(executor, handler, |result| result) else {
      return;
    };
    if let Err(err) = self.start_connect(socket, endpoint, &op) {
      op.complete(Err(err));
    }
  }

  /// The local endpoint of the connection, or the bound endpoint before
  /// there is one. Empty if neither is known.
  pub fn local_endpoint(&self, socket: &SocketImpl<T>) -> Result<NwPtr<T::Endpoint>> {
    let transport = &self.inner.transport;
    let (parameters, connection) = socket.record.handles()?;
    if let Some(connection) = connection.as_ref() {
      let local = transport.connection_local_endpoint(connection);
      if local.is_some() {
        return Ok(local);
      }
    }
    match parameters.as_ref() {
      Some(parameters) => Ok(transport.local_endpoint(parameters)),
      None => Err(Error::BadDescriptor),
    }
  }

  pub fn remote_endpoint(&self, socket: &SocketImpl<T>) -> Result<NwPtr<T::Endpoint>> {
    let (_, connection) = socket.record.handles()?;
    match connection.as_ref() {
      Some(connection) => Ok(self.inner.transport.connection_remote_endpoint(connection)),
      None => Err(Error::NotConnected),
    }
  }

  /// Changes an option. Connection-time options fail with
  /// [`Error::AlreadyConnected`] once a connection exists.
  pub fn set_option<O: SocketOption>(&self, socket: &SocketImpl<T>, option: &O) -> Result<()> {
    let parameters = if O::connection_time_only() {
      socket.record.unconnected_parameters()?
    } else {
      socket.record.parameters()?
    };
    match parameters.as_ref() {
      Some(parameters) => option.set(&*self.inner.transport, parameters),
      None => Err(Error::BadDescriptor),
    }
  }

  pub fn get_option<O: SocketOption>(&self, socket: &SocketImpl<T>) -> Result<O> {
    let parameters = socket.record.parameters()?;
    match parameters.as_ref() {
      Some(parameters) => O::get(&*self.inner.transport, parameters),
      None => Err(Error::BadDescriptor),
    }
  }
}
