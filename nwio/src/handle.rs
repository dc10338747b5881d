//! Ownership of reference-counted native objects.
//!
//! The native transport hands out opaque objects (parameters, connections,
//! endpoints, data) that carry their own reference count. [`NwPtr`] is the
//! only place that count is touched:
//!
//! - [`NwPtr::adopt`] takes over a reference the caller already owns, without
//!   an extra retain;
//! - cloning retains, so every clone owns one reference;
//! - moving an `NwPtr` never touches the count;
//! - dropping or [`NwPtr::reset`] releases, which frees the object once the
//!   last owner is gone.
//!
//! ```
//! use std::sync::Arc;
//! use nwio::handle::NwPtr;
//!
//! struct Blob(Vec<u8>);
//! nwio::native_object!(Blob);
//!
//! let owned = Arc::new(Blob(vec![1, 2, 3]));
//! let weak = Arc::downgrade(&owned);
//!
//! let first = NwPtr::from_arc(owned);
//! let second = first.clone();
//! assert_eq!(weak.strong_count(), 2);
//! assert!(first == second);
//!
//! drop(first);
//! drop(second);
//! assert_eq!(weak.strong_count(), 0);
//! ```

use std::{fmt, hash, mem::ManuallyDrop, ptr::NonNull};

/// An object whose lifetime is governed by a native reference count.
///
/// # Safety
///
/// `retain` must add one reference and `release` must drop one, freeing the
/// object when the count reaches zero. Both must be callable from any thread,
/// and an object must stay valid while at least one reference is held.
pub unsafe trait NativeObject: Send + Sync + 'static {
  /// Adds one reference to the object behind `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must point to a live object on which the caller holds a reference.
  unsafe fn retain(ptr: NonNull<Self>);

  /// Drops one reference to the object behind `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must point to a live object and the caller must give up the
  /// reference it releases.
  unsafe fn release(ptr: NonNull<Self>);
}

/// Marker for native objects whose count is an [`std::sync::Arc`] strong count.
///
/// # Safety
///
/// Implementors must only ever be allocated through `Arc`, and their
/// [`NativeObject`] impl must map retain/release onto the `Arc` strong count.
/// [`native_object!`](crate::native_object) writes both impls.
pub unsafe trait ArcObject: NativeObject + Sized {}

/// Implements [`NativeObject`] and [`ArcObject`] for a type allocated through
/// `Arc`.
#[macro_export]
macro_rules! native_object {
  ($ty:ty) => {
    unsafe impl $crate::handle::NativeObject for $ty {
      unsafe fn retain(ptr: ::std::ptr::NonNull<Self>) {
        unsafe { ::std::sync::Arc::increment_strong_count(ptr.as_ptr().cast_const()) }
      }

      unsafe fn release(ptr: ::std::ptr::NonNull<Self>) {
        unsafe { ::std::sync::Arc::decrement_strong_count(ptr.as_ptr().cast_const()) }
      }
    }

    unsafe impl $crate::handle::ArcObject for $ty {}
  };
}

/// An owned reference to a native object, or nothing.
pub struct NwPtr<O: NativeObject> {
  ptr: Option<NonNull<O>>,
}

// SAFETY: `NativeObject` requires the object to be usable and released from
// any thread.
unsafe impl<O: NativeObject> Send for NwPtr<O> {}
unsafe impl<O: NativeObject> Sync for NwPtr<O> {}

impl<O: NativeObject> NwPtr<O> {
  /// The empty handle.
  pub const fn null() -> Self {
    Self { ptr: None }
  }

  /// Takes ownership of one existing reference, without retaining.
  ///
  /// # Safety
  ///
  /// The caller must own a reference to the live object behind `raw` and
  /// hands it over to the returned handle.
  pub unsafe fn adopt(raw: NonNull<O>) -> Self {
    Self { ptr: Some(raw) }
  }

  /// Retains the object behind `raw` and owns the new reference.
  ///
  /// # Safety
  ///
  /// `raw` must point to a live object for the duration of the call.
  pub unsafe fn retain_raw(raw: NonNull<O>) -> Self {
    unsafe { O::retain(raw) };
    Self { ptr: Some(raw) }
  }

  /// Releases the held reference, if any, and leaves the handle empty.
  pub fn reset(&mut self) {
    if let Some(ptr) = self.ptr.take() {
      // SAFETY: we owned exactly this reference.
      unsafe { O::release(ptr) };
    }
  }

  /// Takes the reference out, leaving this handle empty.
  pub fn take(&mut self) -> Self {
    Self { ptr: self.ptr.take() }
  }

  /// The raw pointer, for passing into native calls. Ownership stays here.
  pub fn get(&self) -> Option<NonNull<O>> {
    self.ptr
  }

  /// Borrows the object. The handle's reference keeps it alive.
  pub fn as_ref(&self) -> Option<&O> {
    // SAFETY: while we hold a reference the object is live.
    self.ptr.map(|ptr| unsafe { ptr.as_ref() })
  }

  pub fn is_some(&self) -> bool {
    self.ptr.is_some()
  }

  pub fn is_none(&self) -> bool {
    self.ptr.is_none()
  }

  /// Gives up ownership without releasing. The caller now owns the reference.
  pub fn into_raw(self) -> Option<NonNull<O>> {
    ManuallyDrop::new(self).ptr
  }
}

impl<O: ArcObject> NwPtr<O> {
  /// Moves an `Arc` strong count into a handle.
  pub fn from_arc(arc: std::sync::Arc<O>) -> Self {
    let raw = std::sync::Arc::into_raw(arc).cast_mut();
    // SAFETY: `Arc::into_raw` is never null and transfers one strong count,
    // which `ArcObject` guarantees is the native count.
    unsafe { Self::adopt(NonNull::new_unchecked(raw)) }
  }
}

impl<O: NativeObject> Default for NwPtr<O> {
  fn default() -> Self {
    Self::null()
  }
}

impl<O: NativeObject> Clone for NwPtr<O> {
  fn clone(&self) -> Self {
    match self.ptr {
      // SAFETY: our own reference keeps the object live during the retain.
      Some(ptr) => unsafe { Self::retain_raw(ptr) },
      None => Self::null(),
    }
  }
}

impl<O: NativeObject> Drop for NwPtr<O> {
  fn drop(&mut self) {
    self.reset();
  }
}

impl<O: NativeObject> PartialEq for NwPtr<O> {
  fn eq(&self, other: &Self) -> bool {
    self.ptr == other.ptr
  }
}

impl<O: NativeObject> Eq for NwPtr<O> {}

impl<O: NativeObject> hash::Hash for NwPtr<O> {
  fn hash<H: hash::Hasher>(&self, state: &mut H) {
    self.ptr.hash(state);
  }
}

impl<O: NativeObject> fmt::Debug for NwPtr<O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.ptr {
      Some(ptr) => write!(f, "NwPtr({:p})", ptr),
      None => f.write_str("NwPtr(null)"),
    }
  }
}
