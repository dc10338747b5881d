//! Outstanding-operation accounting with a blocking drain.
//!
//! Every asynchronous operation holds a [`ScopeTicket`] from the moment it is
//! admitted until its completion has been handed to the executor. Dropping
//! the ticket is the only way to decrement, so an operation can never be
//! counted out twice.
//!
//! [`AsyncScope::shutdown_and_wait`] first closes admission, then blocks until
//! every ticket has been dropped.

use std::sync::Arc;

use crate::{
  error::{Error, Result},
  sync::{Condvar, Mutex},
};

struct State {
  outstanding: usize,
  closed: bool,
}

struct Inner {
  state: Mutex<State>,
  drained: Condvar,
}

#[derive(Clone)]
pub struct AsyncScope {
  inner: Arc<Inner>,
}

impl Default for AsyncScope {
  fn default() -> Self {
    Self::new()
  }
}

impl AsyncScope {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(State { outstanding: 0, closed: false }),
        drained: Condvar::new(),
      }),
    }
  }

  /// Counts one more outstanding operation.
  ///
  /// Must be called before the operation is registered with the native
  /// transport. Fails with [`Error::ServiceShutdown`] once
  /// [`shutdown_and_wait`](Self::shutdown_and_wait) has started.
  pub fn operation_started(&self) -> Result<ScopeTicket> {
    let mut state = self.inner.state.lock();
    if state.closed {
      return Err(Error::ServiceShutdown);
    }
    state.outstanding += 1;
    Ok(ScopeTicket { inner: self.inner.clone() })
  }

  /// Marks the operation behind `ticket` as finished.
  pub fn operation_completed(&self, ticket: ScopeTicket) {
    drop(ticket);
  }

  pub fn outstanding(&self) -> usize {
    self.inner.state.lock().outstanding
  }

  pub fn is_shut_down(&self) -> bool {
    self.inner.state.lock().closed
  }

  /// Stops admitting operations and blocks until none are outstanding.
  pub fn shutdown_and_wait(&self) {
    let mut state = self.inner.state.lock();
    state.closed = true;
    while state.outstanding > 0 {
      tracing::trace!(outstanding = state.outstanding, "waiting for async scope to drain");
      state = self.inner.drained.wait(state);
    }
  }
}

/// Proof that one operation is counted in an [`AsyncScope`].
#[must_use = "dropping the ticket immediately counts the operation as finished"]
pub struct ScopeTicket {
  inner: Arc<Inner>,
}

impl Drop for ScopeTicket {
  fn drop(&mut self) {
    let mut state = self.inner.state.lock();
    debug_assert!(state.outstanding > 0);
    state.outstanding -= 1;
    if state.outstanding == 0 {
      self.inner.drained.notify_all();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
  };

  #[test]
  fn counts_started_and_completed() {
    let scope = AsyncScope::new();
    let a = scope.operation_started().unwrap();
    let b = scope.operation_started().unwrap();
    assert_eq!(scope.outstanding(), 2);

    scope.operation_completed(a);
    assert_eq!(scope.outstanding(), 1);
    drop(b);
    assert_eq!(scope.outstanding(), 0);
  }

  #[test]
  fn shutdown_with_nothing_outstanding_returns() {
    let scope = AsyncScope::new();
    scope.shutdown_and_wait();
    assert!(scope.is_shut_down());
  }

  #[test]
  fn shutdown_refuses_new_operations() {
    let scope = AsyncScope::new();
    scope.shutdown_and_wait();
    assert_eq!(scope.operation_started().err(), Some(Error::ServiceShutdown));
    assert_eq!(scope.outstanding(), 0);
  }

  #[test]
  fn shutdown_blocks_until_drained() {
    let scope = AsyncScope::new();
    let tickets: Vec<_> = (0..4).map(|_| scope.operation_started().unwrap()).collect();
    let finished = Arc::new(AtomicBool::new(false));

    let waiter = {
      let scope = scope.clone();
      let finished = finished.clone();
      thread::spawn(move || {
        scope.shutdown_and_wait();
        finished.store(true, Ordering::SeqCst);
      })
    };

    for ticket in tickets {
      thread::sleep(Duration::from_millis(5));
      assert!(!finished.load(Ordering::SeqCst), "drain returned with operations outstanding");
      drop(ticket);
    }

    waiter.join().unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(scope.outstanding(), 0);
  }

  #[test]
  fn tickets_dropped_from_many_threads() {
    let scope = AsyncScope::new();
    let handles: Vec<_> = (0..8)
      .map(|_| {
        let tickets: Vec<_> = (0..50).map(|_| scope.operation_started().unwrap()).collect();
        thread::spawn(move || {
          for ticket in tickets {
            if fastrand::bool() {
              thread::yield_now();
            }
            drop(ticket);
          }
        })
      })
      .collect();

    scope.shutdown_and_wait();
    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(scope.outstanding(), 0);
  }
}
