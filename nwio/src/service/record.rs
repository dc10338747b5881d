use std::sync::Arc;

use crate::{
  error::{Error, Result},
  handle::NwPtr,
  native::{SocketKind, Transport},
  op::{self, PendingOps},
  store::Arena,
  sync::Mutex,
};

/// Per-socket bookkeeping.
///
/// `state` is only ever locked briefly to read or swap handles; native calls
/// happen after the guard is gone, on cloned handles.
pub(crate) struct Record<T: Transport> {
  state: Mutex<RecordState<T>>,
  pub(crate) pending: Arc<PendingOps>,
}

pub(crate) struct RecordState<T: Transport> {
  pub(crate) parameters: NwPtr<T::Parameters>,
  pub(crate) connection: NwPtr<T::Connection>,
  /// Receive size override. Non-zero for datagram sockets so that a whole
  /// datagram is read even into a smaller buffer.
  pub(crate) max_receive_size: usize,
}

impl<T: Transport> Default for RecordState<T> {
  fn default() -> Self {
    Self { parameters: NwPtr::null(), connection: NwPtr::null(), max_receive_size: 0 }
  }
}

/// Handles needed to issue I/O on a connected socket.
pub(crate) struct IoHandles<T: Transport> {
  pub(crate) connection: NwPtr<T::Connection>,
  pub(crate) kind: SocketKind,
  pub(crate) max_receive_size: usize,
}

impl<T: Transport> Record<T> {
  pub(crate) fn new() -> Self {
    Self { state: Mutex::new(RecordState::default()), pending: Arc::new(Mutex::new(Arena::new())) }
  }

  pub(crate) fn is_open(&self) -> bool {
    self.state.lock().parameters.is_some()
  }

  pub(crate) fn open(
    &self,
    parameters: NwPtr<T::Parameters>,
    max_receive_size: usize,
  ) -> Result<()> {
    let mut state = self.state.lock();
    if state.parameters.is_some() {
      return Err(Error::AlreadyOpen);
    }
    state.parameters = parameters;
    state.max_receive_size = max_receive_size;
    Ok(())
  }

  pub(crate) fn assign(
    &self,
    parameters: NwPtr<T::Parameters>,
    connection: NwPtr<T::Connection>,
    max_receive_size: usize,
  ) -> Result<()> {
    let mut state = self.state.lock();
    if state.parameters.is_some() {
      return Err(Error::AlreadyOpen);
    }
    *state = RecordState { parameters, connection, max_receive_size };
    Ok(())
  }

  /// Parameters of an open socket.
  pub(crate) fn parameters(&self) -> Result<NwPtr<T::Parameters>> {
    let state = self.state.lock();
    if state.parameters.is_none() {
      return Err(Error::BadDescriptor);
    }
    Ok(state.parameters.clone())
  }

  /// Parameters of an open socket that has no connection yet.
  pub(crate) fn unconnected_parameters(&self) -> Result<NwPtr<T::Parameters>> {
    let state = self.state.lock();
    if state.parameters.is_none() {
      return Err(Error::BadDescriptor);
    }
    if state.connection.is_some() {
      return Err(Error::AlreadyConnected);
    }
    Ok(state.parameters.clone())
  }

  /// Both handles of an open socket. The connection may be empty.
  pub(crate) fn handles(&self) -> Result<(NwPtr<T::Parameters>, NwPtr<T::Connection>)> {
    let state = self.state.lock();
    if state.parameters.is_none() {
      return Err(Error::BadDescriptor);
    }
    Ok((state.parameters.clone(), state.connection.clone()))
  }

  pub(crate) fn io_handles(&self, transport: &T) -> Result<IoHandles<T>> {
    let (parameters, connection, max_receive_size) = {
      let state = self.state.lock();
      if state.parameters.is_none() {
        return Err(Error::BadDescriptor);
      }
      if state.connection.is_none() {
        return Err(Error::NotConnected);
      }
      (state.parameters.clone(), state.connection.clone(), state.max_receive_size)
    };
    let kind = match parameters.as_ref() {
      Some(parameters) => transport.parameters_kind(parameters),
      None => return Err(Error::BadDescriptor),
    };
    Ok(IoHandles { connection, kind, max_receive_size })
  }

  /// Stores a freshly created connection, unless one appeared meanwhile.
  pub(crate) fn install_connection(&self, connection: &NwPtr<T::Connection>) -> Result<()> {
    let mut state = self.state.lock();
    if state.parameters.is_none() {
      return Err(Error::BadDescriptor);
    }
    if state.connection.is_some() {
      return Err(Error::AlreadyConnected);
    }
    state.connection = connection.clone();
    Ok(())
  }

  /// Forgets `connection` if it is still the record's connection.
  pub(crate) fn clear_connection(&self, connection: &NwPtr<T::Connection>) -> bool {
    let mut state = self.state.lock();
    if state.connection == *connection {
      state.connection.reset();
      true
    } else {
      false
    }
  }

  /// Empties the record, handing back what it held.
  pub(crate) fn take(&self) -> RecordState<T> {
    std::mem::take(&mut *self.state.lock())
  }

  /// Fills an empty record. Whatever it held before is dropped.
  pub(crate) fn put(&self, state: RecordState<T>) {
    *self.state.lock() = state;
  }

  pub(crate) fn cancel_pending(&self) -> usize {
    op::cancel_all(&self.pending)
  }

  /// Aborts pending operations and keeps the connection. Receives are
  /// withdrawn through the transport so that no bytes go to an abandoned
  /// receive.
  pub(crate) fn cancel(&self, transport: &T) -> usize {
    let connection = self.state.lock().connection.clone();
    match connection.as_ref() {
      Some(connection) => {
        transport.cancel_receives(connection);
        op::cancel_except_receives(&self.pending)
      }
      None => self.cancel_pending(),
    }
  }

  /// Cancels pending operations, tears down the connection and releases both
  /// handles. Returns whether the record was open.
  pub(crate) fn close(&self, transport: &T) -> bool {
    let state = self.take();
    let cancelled = self.cancel_pending();
    if let Some(connection) = state.connection.as_ref() {
      transport.set_state_changed_handler(connection, None);
      transport.cancel(connection);
    }
    let was_open = state.parameters.is_some();
    if was_open || cancelled > 0 {
      tracing::debug!(cancelled, "socket closed");
    }
    was_open
  }
}
