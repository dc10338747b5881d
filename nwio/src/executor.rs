//! The continuation-posting contract and a queue-backed scheduler.
//!
//! The socket service never runs a completion handler itself. It packages the
//! handler with its result and [`post`](Executor::post)s it; whatever owns the
//! executor decides which thread runs it and when. An [`Executor`] must never
//! run the task inline from inside `post`.
//!
//! [`Scheduler`] is a small run-queue in the spirit of an event loop: tasks
//! are queued by `post` and run by whichever thread calls
//! [`run_one`](Scheduler::run_one), [`poll`](Scheduler::poll) or friends.
//!
//! ```
//! use nwio::executor::{Executor, Scheduler};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! let scheduler = Scheduler::new();
//! let ran = Arc::new(AtomicUsize::new(0));
//!
//! let counter = ran.clone();
//! scheduler.handle().post(Box::new(move || {
//!   counter.fetch_add(1, Ordering::SeqCst);
//! }));
//!
//! // Nothing runs until the scheduler is driven.
//! assert_eq!(ran.load(Ordering::SeqCst), 0);
//! assert_eq!(scheduler.poll(), 1);
//! assert_eq!(ran.load(Ordering::SeqCst), 1);
//! ```

use std::{sync::Arc, time::Duration};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync + 'static {
  /// Queues `task` to run later. Must not run it before returning.
  fn post(&self, task: Task);

  /// Queues `task` that continues a chain of asynchronous work.
  ///
  /// Executors may favour these over freshly posted work.
  fn post_continuation(&self, task: Task) {
    self.post(task);
  }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
  fn post(&self, task: Task) {
    (**self).post(task);
  }

  fn post_continuation(&self, task: Task) {
    (**self).post_continuation(task);
  }
}

/// Run-queue executor driven by its caller.
///
/// Continuations are kept in their own queue and run before plain posts, so
/// a chain of operations keeps moving while new work waits its turn.
pub struct Scheduler {
  handle: SchedulerHandle,
  ready: Receiver<Task>,
  continuations: Receiver<Task>,
}

/// Cloneable posting side of a [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
  ready: Sender<Task>,
  continuations: Sender<Task>,
}

impl Default for Scheduler {
  fn default() -> Self {
    Self::new()
  }
}

impl Scheduler {
  pub fn new() -> Self {
    let (ready_tx, ready_rx) = crossbeam_channel::unbounded();
    let (cont_tx, cont_rx) = crossbeam_channel::unbounded();
    Self {
      handle: SchedulerHandle { ready: ready_tx, continuations: cont_tx },
      ready: ready_rx,
      continuations: cont_rx,
    }
  }

  pub fn handle(&self) -> SchedulerHandle {
    self.handle.clone()
  }

  /// Number of queued tasks.
  pub fn pending(&self) -> usize {
    self.ready.len() + self.continuations.len()
  }

  fn try_next(&self) -> Option<Task> {
    match self.continuations.try_recv() {
      Ok(task) => return Some(task),
      Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
    }
    self.ready.try_recv().ok()
  }

  /// Runs one queued task if there is one.
  pub fn poll_one(&self) -> bool {
    match self.try_next() {
      Some(task) => {
        task();
        true
      }
      None => false,
    }
  }

  /// Runs queued tasks until the queues are empty. Returns how many ran.
  pub fn poll(&self) -> usize {
    let mut ran = 0;
    while self.poll_one() {
      ran += 1;
    }
    ran
  }

  /// Blocks until a task is available, then runs it.
  ///
  /// The scheduler holds its own senders, so this waits forever if nothing is
  /// ever posted. Prefer [`run_one_timeout`](Self::run_one_timeout) when the
  /// work may not arrive.
  pub fn run_one(&self) {
    if self.poll_one() {
      return;
    }
    let task = crossbeam_channel::select! {
      recv(self.continuations) -> task => task,
      recv(self.ready) -> task => task,
    };
    if let Ok(task) = task {
      task();
    }
  }

  /// Waits up to `timeout` for a task and runs it. Returns whether one ran.
  pub fn run_one_timeout(&self, timeout: Duration) -> bool {
    if self.poll_one() {
      return true;
    }
    let task = crossbeam_channel::select! {
      recv(self.continuations) -> task => task.ok(),
      recv(self.ready) -> task => task.ok(),
      default(timeout) => None,
    };
    match task {
      Some(task) => {
        task();
        true
      }
      None => false,
    }
  }

  /// Runs tasks until `done` returns true or `timeout` passes without any
  /// task arriving. Returns the final value of `done`.
  pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> bool
  where
    F: FnMut() -> bool,
  {
    while !done() {
      if !self.run_one_timeout(timeout) {
        return done();
      }
    }
    true
  }
}

impl Executor for SchedulerHandle {
  fn post(&self, task: Task) {
    // The receiving side lives in the scheduler; once it is gone there is
    // nobody left to run the task and dropping it is all that can be done.
    if self.ready.send(task).is_err() {
      tracing::warn!("task posted to a dropped scheduler");
    }
  }

  fn post_continuation(&self, task: Task) {
    if self.continuations.send(task).is_err() {
      tracing::warn!("continuation posted to a dropped scheduler");
    }
  }
}

impl Executor for Scheduler {
  fn post(&self, task: Task) {
    self.handle.post(task);
  }

  fn post_continuation(&self, task: Task) {
    self.handle.post_continuation(task);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::Mutex;
  use std::thread;

  #[test]
  fn post_never_runs_inline() {
    let scheduler = Scheduler::new();
    let log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    scheduler.post(Box::new(move || l.lock().push("task")));
    log.lock().push("after post");

    scheduler.poll();
    assert_eq!(*log.lock(), vec!["after post", "task"]);
  }

  #[test]
  fn continuations_run_first() {
    let scheduler = Scheduler::new();
    let handle = scheduler.handle();
    let log = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b"] {
      let l = log.clone();
      handle.post(Box::new(move || l.lock().push(name)));
    }
    let l = log.clone();
    handle.post_continuation(Box::new(move || l.lock().push("cont")));

    assert_eq!(scheduler.pending(), 3);
    assert_eq!(scheduler.poll(), 3);
    assert_eq!(*log.lock(), vec!["cont", "a", "b"]);
  }

  #[test]
  fn run_one_timeout_waits_for_other_threads() {
    let scheduler = Scheduler::new();
    let handle = scheduler.handle();

    let poster = thread::spawn(move || {
      thread::sleep(Duration::from_millis(10));
      handle.post(Box::new(|| {}));
    });

    assert!(scheduler.run_one_timeout(Duration::from_secs(5)));
    poster.join().unwrap();
    assert!(!scheduler.run_one_timeout(Duration::from_millis(10)));
  }

  #[test]
  fn run_until_stops_when_done() {
    let scheduler = Scheduler::new();
    let count = Arc::new(Mutex::new(0));
    for _ in 0..5 {
      let c = count.clone();
      scheduler.post(Box::new(move || *c.lock() += 1));
    }

    let c = count.clone();
    assert!(scheduler.run_until(Duration::from_millis(50), move || *c.lock() >= 3));
    assert_eq!(*count.lock(), 3);
    assert_eq!(scheduler.pending(), 2);
  }
}
