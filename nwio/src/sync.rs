//! Lock primitives used by the service and the loopback transport.
//!
//! Backed by `parking_lot` when the `parking_lot` feature is enabled and by
//! `std::sync` otherwise. Neither flavour exposes poisoning: a panic while a
//! lock is held leaves the data as it was and the next locker proceeds.

#[cfg(feature = "parking_lot")]
pub use self::parking::*;

#[cfg(not(feature = "parking_lot"))]
pub use self::std_sync::*;

#[cfg(feature = "parking_lot")]
mod parking {
  pub use parking_lot::{Mutex, MutexGuard};

  /// Condition variable with a by-value `wait`, matching the `std` flavour.
  #[derive(Default)]
  pub struct Condvar(parking_lot::Condvar);

  impl Condvar {
    pub const fn new() -> Self {
      Self(parking_lot::Condvar::new())
    }

    pub fn wait<'a, T>(&self, mut guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
      self.0.wait(&mut guard);
      guard
    }

    pub fn notify_all(&self) {
      self.0.notify_all();
    }
  }
}

#[cfg(not(feature = "parking_lot"))]
mod std_sync {
  use std::sync as std_sync;

  /// A mutual exclusion primitive that wraps `std::sync::Mutex` without
  /// poisoning.
  #[derive(Default)]
  pub struct Mutex<T: ?Sized> {
    inner: std_sync::Mutex<T>,
  }

  impl<T> Mutex<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
      Self { inner: std_sync::Mutex::new(value) }
    }
  }

  impl<T: ?Sized> Mutex<T> {
    /// Acquires the mutex, blocking the current thread until it is able to.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, T> {
      MutexGuard { inner: self.inner.lock().unwrap_or_else(|e| e.into_inner()) }
    }
  }

  pub struct MutexGuard<'a, T: ?Sized> {
    inner: std_sync::MutexGuard<'a, T>,
  }

  impl<T: ?Sized> std::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
      &self.inner
    }
  }

  impl<T: ?Sized> std::ops::DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
      &mut self.inner
    }
  }

  /// Condition variable paired with [`Mutex`].
  #[derive(Default)]
  pub struct Condvar(std_sync::Condvar);

  impl Condvar {
    pub const fn new() -> Self {
      Self(std_sync::Condvar::new())
    }

    /// Blocks until notified. Spurious wakeups are possible, callers loop.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
      let inner = self.0.wait(guard.inner).unwrap_or_else(|e| e.into_inner());
      MutexGuard { inner }
    }

    pub fn notify_all(&self) {
      self.0.notify_all();
    }
  }
}
