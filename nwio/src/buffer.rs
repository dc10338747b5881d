//! Byte-buffer sequences and their conversion to native data objects.
//!
//! A buffer sequence is any value that can be viewed as an ordered list of
//! contiguous byte regions. [`ConstBuffers`] is read from when sending,
//! [`MutBuffers`] is written into when receiving. The size of a sequence is
//! the sum of its regions' lengths; for `Vec<u8>` that is `len()`, not
//! `capacity()`, so receive into `vec![0; n]`.
//!
//! [`gather`] turns a sequence into one native data object in a single pass
//! over its regions. [`scatter`] copies a native data object back out,
//! stopping when the destination is full and discarding the rest.

use crate::{handle::NwPtr, native::Transport};

/// A sequence of readable byte regions.
pub trait ConstBuffers {
  fn regions(&self) -> impl Iterator<Item = &[u8]>;

  fn total_size(&self) -> usize {
    self.regions().map(<[u8]>::len).sum()
  }
}

/// A sequence of writable byte regions.
pub trait MutBuffers {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]>;

  /// Number of bytes that fit, the sum of the region lengths.
  fn total_capacity(&self) -> usize;
}

impl ConstBuffers for [u8] {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    std::iter::once(self)
  }
}

impl<const N: usize> ConstBuffers for [u8; N] {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    std::iter::once(self.as_slice())
  }
}

impl ConstBuffers for Vec<u8> {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    std::iter::once(self.as_slice())
  }
}

impl ConstBuffers for Box<[u8]> {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    std::iter::once(&**self)
  }
}

impl ConstBuffers for str {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    std::iter::once(self.as_bytes())
  }
}

impl ConstBuffers for String {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    std::iter::once(self.as_bytes())
  }
}

impl ConstBuffers for Vec<Vec<u8>> {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    self.iter().map(Vec::as_slice)
  }
}

impl<T: ConstBuffers + ?Sized> ConstBuffers for &T {
  fn regions(&self) -> impl Iterator<Item = &[u8]> {
    (**self).regions()
  }
}

impl MutBuffers for [u8] {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
    std::iter::once(self)
  }

  fn total_capacity(&self) -> usize {
    self.len()
  }
}

impl<const N: usize> MutBuffers for [u8; N] {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
    std::iter::once(self.as_mut_slice())
  }

  fn total_capacity(&self) -> usize {
    N
  }
}

impl MutBuffers for Vec<u8> {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
    std::iter::once(self.as_mut_slice())
  }

  fn total_capacity(&self) -> usize {
    self.len()
  }
}

impl MutBuffers for Box<[u8]> {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
    std::iter::once(&mut **self)
  }

  fn total_capacity(&self) -> usize {
    self.len()
  }
}

impl MutBuffers for Vec<Vec<u8>> {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
    self.iter_mut().map(Vec::as_mut_slice)
  }

  fn total_capacity(&self) -> usize {
    self.iter().map(Vec::len).sum()
  }
}

impl<T: MutBuffers + ?Sized> MutBuffers for &mut T {
  fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
    (**self).regions_mut()
  }

  fn total_capacity(&self) -> usize {
    (**self).total_capacity()
  }
}

#[cfg(feature = "bytes")]
mod bytes_impls {
  use super::{ConstBuffers, MutBuffers};

  impl ConstBuffers for bytes::Bytes {
    fn regions(&self) -> impl Iterator<Item = &[u8]> {
      std::iter::once(&self[..])
    }
  }

  impl ConstBuffers for bytes::BytesMut {
    fn regions(&self) -> impl Iterator<Item = &[u8]> {
      std::iter::once(&self[..])
    }
  }

  impl MutBuffers for bytes::BytesMut {
    fn regions_mut(&mut self) -> impl Iterator<Item = &mut [u8]> {
      std::iter::once(&mut self[..])
    }

    fn total_capacity(&self) -> usize {
      self.len()
    }
  }
}

/// Builds one native data object holding every region of `buffers`, in order.
///
/// Empty regions are skipped. Returns the empty handle when there is nothing
/// to send.
pub fn gather<T, B>(transport: &T, buffers: &B) -> NwPtr<T::Data>
where
  T: Transport,
  B: ConstBuffers + ?Sized,
{
  let mut data = NwPtr::null();
  for region in buffers.regions().filter(|region| !region.is_empty()) {
    let chunk = transport.create_data(region);
    let joined = match (data.as_ref(), chunk.as_ref()) {
      (Some(head), Some(tail)) => Some(transport.concat_data(head, tail)),
      _ => None,
    };
    data = joined.unwrap_or(chunk);
  }
  data
}

/// Copies `data` into `buffers`, region by region. Returns the number of bytes
/// copied, which is at most `buffers.total_capacity()`; the rest of `data` is
/// dropped.
pub fn scatter<T, B>(transport: &T, data: &T::Data, buffers: &mut B) -> usize
where
  T: Transport,
  B: MutBuffers + ?Sized,
{
  let mut copied = 0;
  let mut dest = buffers.regions_mut().filter(|region| !region.is_empty());
  let mut current: Option<(&mut [u8], usize)> = dest.next().map(|region| (region, 0));

  transport.apply_data(data, &mut |mut src: &[u8]| {
    while !src.is_empty() {
      let Some((region, offset)) = current.as_mut() else {
        return false;
      };
      let n = (region.len() - *offset).min(src.len());
      region[*offset..*offset + n].copy_from_slice(&src[..n]);
      *offset += n;
      copied += n;
      src = &src[n..];

      if *offset == region.len() {
        current = dest.next().map(|region| (region, 0));
      }
    }
    true
  });
  copied
}
