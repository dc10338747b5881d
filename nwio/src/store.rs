//! Generational arena.
//!
//! Backs the service's socket registry and each record's table of pending
//! operations. Keys stay valid while their entry lives; once an entry is
//! removed its slot may be reused, but with a bumped generation, so a stale
//! key never reaches the new occupant.

use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Key {
  generation: u32,
  slot: u32,
}

impl Key {
  pub fn slot(&self) -> u32 {
    self.slot
  }

  pub fn generation(&self) -> u32 {
    self.generation
  }
}

impl fmt::Debug for Key {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Key({}v{})", self.slot, self.generation)
  }
}

enum Entry<T> {
  Occupied { generation: u32, value: T },
  Vacant { generation: u32, next_free: Option<u32> },
}

pub struct Arena<T> {
  entries: Vec<Entry<T>>,
  free_head: Option<u32>,
  len: usize,
}

impl<T> Default for Arena<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Arena<T> {
  pub fn new() -> Self {
    Self::with_capacity(0)
  }

  pub fn with_capacity(cap: usize) -> Self {
    Self { entries: Vec::with_capacity(cap), free_head: None, len: 0 }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn insert(&mut self, value: T) -> Key {
    self.len += 1;
    match self.free_head {
      Some(slot) => {
        let entry = &mut self.entries[slot as usize];
        let (generation, next_free) = match entry {
          Entry::Vacant { generation, next_free } => (*generation, *next_free),
          Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };
        // Reuse the freed slot with the next generation.
        let generation = generation.wrapping_add(1);
        *entry = Entry::Occupied { generation, value };
        self.free_head = next_free;
        Key { generation, slot }
      }
      None => {
        let slot = u32::try_from(self.entries.len()).expect("arena slot overflow");
        self.entries.push(Entry::Occupied { generation: 0, value });
        Key { generation: 0, slot }
      }
    }
  }

  pub fn remove(&mut self, key: Key) -> Option<T> {
    let free_head = self.free_head;
    let entry = self.entries.get_mut(key.slot as usize)?;
    let live = matches!(entry, Entry::Occupied { generation, .. } if *generation == key.generation);
    if !live {
      // Stale key or empty slot.
      return None;
    }

    let vacant = Entry::Vacant { generation: key.generation, next_free: free_head };
    match std::mem::replace(entry, vacant) {
      Entry::Occupied { value, .. } => {
        self.free_head = Some(key.slot);
        self.len -= 1;
        Some(value)
      }
      Entry::Vacant { .. } => unreachable!(),
    }
  }

  pub fn get(&self, key: Key) -> Option<&T> {
    match self.entries.get(key.slot as usize)? {
      Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
      _ => None,
    }
  }

  pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
    match self.entries.get_mut(key.slot as usize)? {
      Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
      _ => None,
    }
  }

  pub fn contains(&self, key: Key) -> bool {
    self.get(key).is_some()
  }

  pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
    self.entries.iter().enumerate().filter_map(|(slot, entry)| match entry {
      Entry::Occupied { generation, value } => {
        Some((Key { generation: *generation, slot: slot as u32 }, value))
      }
      Entry::Vacant { .. } => None,
    })
  }

  /// Removes every entry, returning them in slot order.
  pub fn drain(&mut self) -> Vec<(Key, T)> {
    let keys: Vec<Key> = self.iter().map(|(key, _)| key).collect();
    keys.into_iter().filter_map(|key| self.remove(key).map(|value| (key, value))).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_basic_insert_and_remove() {
    let mut arena = Arena::new();
    let key = arena.insert("a");

    assert_eq!(arena.remove(key), Some("a"));
    assert_eq!(arena.remove(key), None); // Second remove should fail
    assert!(arena.is_empty());
  }

  #[test]
  fn test_sequential_keys_are_unique() {
    let mut arena = Arena::new();
    let mut keys = HashSet::new();

    for i in 0..1000 {
      let key = arena.insert(i);
      assert!(keys.insert(key), "Generated duplicate key: {:?}", key);
    }
    assert_eq!(arena.len(), 1000);
  }

  #[test]
  fn test_slot_reuse_increments_generation() {
    let mut arena = Arena::new();

    let key1 = arena.insert(1);
    assert_eq!(key1.generation(), 0);
    assert_eq!(key1.slot(), 0);

    arena.remove(key1);

    let key2 = arena.insert(2);
    assert_eq!(key2.slot(), 0, "Slot should be reused");
    assert_eq!(key2.generation(), 1, "Generation should increment");
  }

  #[test]
  fn test_stale_key_rejected() {
    let mut arena = Arena::new();

    let key1 = arena.insert(1);
    arena.remove(key1);
    let key2 = arena.insert(2);

    assert!(arena.get(key1).is_none(), "Stale key should return None");
    assert!(arena.get_mut(key1).is_none());
    assert_eq!(arena.remove(key1), None, "Stale key should be rejected");
    assert_eq!(arena.get(key2), Some(&2));
  }

  #[test]
  fn test_generation_wrapping() {
    let mut arena = Arena::new();
    let key = arena.insert(());
    arena.remove(key);
    if let Entry::Vacant { generation, .. } = &mut arena.entries[0] {
      *generation = u32::MAX;
    }
    let next = arena.insert(());
    assert_eq!(next.slot(), 0);
    assert_eq!(next.generation(), 0, "Generation should wrap to 0");
  }

  #[test]
  fn test_iter_and_drain_skip_vacant() {
    let mut arena = Arena::new();
    let a = arena.insert('a');
    let b = arena.insert('b');
    let c = arena.insert('c');
    arena.remove(b);

    let seen: Vec<_> = arena.iter().map(|(k, v)| (k, *v)).collect();
    assert_eq!(seen, vec![(a, 'a'), (c, 'c')]);

    let drained = arena.drain();
    assert_eq!(drained, vec![(a, 'a'), (c, 'c')]);
    assert!(arena.is_empty());
    assert!(!arena.contains(a));
  }

  #[test]
  fn test_no_key_collision_under_churn() {
    let mut arena = Arena::new();
    let mut live = Vec::new();
    let mut seen = HashSet::new();

    for i in 0..10_000 {
      let key = arena.insert(i);
      assert!(seen.insert(key), "Key collision at iteration {}: {:?}", i, key);
      live.push(key);

      if fastrand::u8(..) < 100 && !live.is_empty() {
        let idx = fastrand::usize(..live.len());
        let key = live.swap_remove(idx);
        assert!(arena.remove(key).is_some());
      }
    }
    assert_eq!(arena.len(), live.len());
  }
}
