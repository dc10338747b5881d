//! Pending operations and their exactly-once completion.
//!
//! An [`AsyncOp`] is created per call and carries everything needed to
//! finish it: the conversion from the native outcome to the caller's result,
//! the executor to post to, the [`ScopeTicket`] keeping the service's drain
//! open, and its slot in the owning socket's table of pending operations.
//!
//! Two paths race to finish an operation: the native callback and
//! cancellation. Whichever flips the `fired` flag first delivers; the loser
//! does nothing. After delivery the op leaves the pending table and drops its
//! ticket, in that order, so a drain that sees zero outstanding operations
//! also sees every completion already posted.

use std::sync::{
  Arc, Weak,
  atomic::{AtomicBool, Ordering},
};

use crate::{
  error::{Error, Result},
  executor::{Executor, Task},
  scope::ScopeTicket,
  store::{Arena, Key},
  sync::Mutex,
};

/// Callback invoked with an operation's result.
///
/// Any `FnOnce(R) + Send + 'static` is a handler. Wrap it in [`Continuation`]
/// to mark it as continuing a chain of operations, which lets the executor
/// prioritise it.
pub trait Handler<R>: Send + 'static {
  fn call(self, result: R);

  fn is_continuation(&self) -> bool {
    false
  }
}

impl<R, F> Handler<R> for F
where
  F: FnOnce(R) + Send + 'static,
{
  fn call(self, result: R) {
    self(result)
  }
}

/// Marks a handler as a continuation of the operation that started it.
pub struct Continuation<F>(pub F);

impl<R, F> Handler<R> for Continuation<F>
where
  F: FnOnce(R) + Send + 'static,
{
  fn call(self, result: R) {
    (self.0)(result)
  }

  fn is_continuation(&self) -> bool {
    true
  }
}

/// Something that can be finished early with [`Error::OperationAborted`].
pub(crate) trait Cancel: Send + Sync {
  fn cancel(&self);
}

/// One entry of a socket's pending table.
pub(crate) struct Registered {
  op: Arc<dyn Cancel>,
  /// A receive is withdrawn through the transport, which completes it with
  /// `ECANCELED` unless data got there first.
  receive: bool,
}

/// Pending operations of one socket.
pub(crate) type PendingOps = Mutex<Arena<Registered>>;

/// Turns the native outcome into the task that delivers it.
pub(crate) type Finish<N> = Box<dyn FnOnce(Result<N>) -> Task + Send>;

/// Where the finished task goes.
pub(crate) enum Delivery {
  /// Posted to the caller's executor.
  Post { executor: Box<dyn Executor>, is_continuation: bool },
  /// Run on the completing thread. Only for tasks that do nothing but wake a
  /// blocked caller.
  Inline,
}

struct Pending<N> {
  finish: Finish<N>,
  delivery: Delivery,
  ticket: ScopeTicket,
  registration: Option<(Weak<PendingOps>, Key)>,
}

pub(crate) struct AsyncOp<N> {
  fired: AtomicBool,
  pending: Mutex<Option<Pending<N>>>,
}

impl<N: Send + 'static> AsyncOp<N> {
  pub(crate) fn new(finish: Finish<N>, delivery: Delivery, ticket: ScopeTicket) -> Arc<Self> {
    Arc::new(Self {
      fired: AtomicBool::new(false),
      pending: Mutex::new(Some(Pending { finish, delivery, ticket, registration: None })),
    })
  }

  /// Enters the op into `table`, so cancelling the socket reaches it.
  pub(crate) fn register(self: &Arc<Self>, table: &Arc<PendingOps>) {
    self.enter(table, false);
  }

  /// Like [`register`](Self::register), for an op waiting on a native
  /// receive.
  pub(crate) fn register_receive(self: &Arc<Self>, table: &Arc<PendingOps>) {
    self.enter(table, true);
  }

  fn enter(self: &Arc<Self>, table: &Arc<PendingOps>, receive: bool) {
    let key = table.lock().insert(Registered { op: self.clone(), receive });
    let registered = match self.pending.lock().as_mut() {
      Some(pending) => {
        pending.registration = Some((Arc::downgrade(table), key));
        true
      }
      None => false,
    };
    if !registered {
      // Finished between insert and here.
      table.lock().remove(key);
    }
  }

  pub(crate) fn is_fired(&self) -> bool {
    self.fired.load(Ordering::Acquire)
  }

  /// Delivers `result` unless the op already finished. Returns whether this
  /// call delivered.
  pub(crate) fn complete(&self, result: Result<N>) -> bool {
    if self.fired.swap(true, Ordering::AcqRel) {
      return false;
    }
    let Some(pending) = self.pending.lock().take() else {
      return false;
    };

    let task = (pending.finish)(result);
    match pending.delivery {
      Delivery::Post { executor, is_continuation: true } => executor.post_continuation(task),
      Delivery::Post { executor, is_continuation: false } => executor.post(task),
      Delivery::Inline => task(),
    }

    if let Some((table, key)) = pending.registration
      && let Some(table) = table.upgrade()
    {
      table.lock().remove(key);
    }
    drop(pending.ticket);
    true
  }

  /// The callback half handed to the native transport.
  pub(crate) fn completer(self: &Arc<Self>) -> Completer<N> {
    Completer { op: self.clone() }
  }
}

impl<N: Send + 'static> Cancel for AsyncOp<N> {
  fn cancel(&self) {
    if self.complete(Err(Error::OperationAborted)) {
      tracing::trace!("operation cancelled");
    }
  }
}

/// Owned by the native callback. Finishing through it after a cancel is
/// logged; dropping it unused aborts the operation.
pub(crate) struct Completer<N: Send + 'static> {
  op: Arc<AsyncOp<N>>,
}

impl<N: Send + 'static> Completer<N> {
  pub(crate) fn is_finished(&self) -> bool {
    self.op.is_fired()
  }

  pub(crate) fn complete(self, result: Result<N>) {
    let aborted = matches!(result, Err(Error::OperationAborted));
    if !self.op.complete(result) && !aborted {
      tracing::warn!("native completion arrived after the operation was already finished");
    }
  }
}

impl<N: Send + 'static> Drop for Completer<N> {
  fn drop(&mut self) {
    if !self.op.is_fired() {
      tracing::warn!("native callback dropped without firing, aborting operation");
      self.op.complete(Err(Error::OperationAborted));
    }
  }
}

/// Cancels every op in `table`. Ops remove themselves as they finish.
pub(crate) fn cancel_all(table: &PendingOps) -> usize {
  cancel_matching(table, |_| true)
}

/// Cancels every op in `table` except those waiting on a native receive.
pub(crate) fn cancel_except_receives(table: &PendingOps) -> usize {
  cancel_matching(table, |entry| !entry.receive)
}

fn cancel_matching(table: &PendingOps, select: impl Fn(&Registered) -> bool) -> usize {
  let ops: Vec<Arc<dyn Cancel>> = table
    .lock()
    .iter()
    .filter(|(_, entry)| select(entry))
    .map(|(_, entry)| entry.op.clone())
    .collect();
  for op in &ops {
    op.cancel();
  }
  ops.len()
}
