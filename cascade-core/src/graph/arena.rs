//! Generational Slot Arena
//!
//! Nodes and edges live in arenas and refer to each other only by key, so
//! the graph has no reference cycles and no `Rc` bookkeeping of its own.
//!
//! # Keys
//!
//! A key is an `(index, generation)` pair. Removing an entry bumps the slot's
//! generation and pushes the slot onto a free list, so stale keys held by
//! user handles (a disposed computation, a dropped cell) simply stop
//! resolving instead of aliasing whatever reuses the slot.

use std::fmt::Debug;
use std::marker::PhantomData;

/// Raw arena key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    /// Slot index, stable for the lifetime of the entry.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the entry was inserted.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Typed wrapper around a [`Key`].
pub trait ArenaKey: Copy + Eq + Debug {
    fn from_key(key: Key) -> Self;
    fn key(self) -> Key;
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A slot arena with O(1) insert, remove and lookup.
pub struct Arena<K: ArenaKey, T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            _key: PhantomData,
        }
    }

    /// Insert a value, reusing a free slot when one is available.
    pub fn insert(&mut self, value: T) -> K {
        self.len += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant { generation, next_free } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            self.free_head = next_free;
            *slot = Slot::Occupied { generation, value };
            return K::from_key(Key { index, generation });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied { generation: 0, value });
        K::from_key(Key { index, generation: 0 })
    }

    /// Remove the entry for `key`, returning its value.
    ///
    /// Returns `None` if the key is stale.
    pub fn remove(&mut self, key: K) -> Option<T> {
        let key = key.key();
        let slot = self.slots.get_mut(key.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        let vacant = Slot::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let old = std::mem::replace(slot, vacant);
        self.free_head = Some(key.index);
        self.len -= 1;

        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let key = key.key();
        match self.slots.get(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let key = key.key();
        match self.slots.get_mut(key.index as usize)? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Iterate over live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { generation, value } => Some((
                K::from_key(Key {
                    index: index as u32,
                    generation: *generation,
                }),
                value,
            )),
            Slot::Vacant { .. } => None,
        })
    }
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct TestKey(Key);

    impl ArenaKey for TestKey {
        fn from_key(key: Key) -> Self {
            Self(key)
        }

        fn key(self) -> Key {
            self.0
        }
    }

    #[test]
    fn insert_and_get() {
        let mut arena: Arena<TestKey, &str> = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn removed_slot_is_reused_with_new_generation() {
        let mut arena: Arena<TestKey, u32> = Arena::new();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));
        assert!(arena.get(a).is_none());

        let b = arena.insert(2);
        assert_eq!(a.0.index(), b.0.index());
        assert_ne!(a.0.generation(), b.0.generation());

        // The stale key must not see the new occupant
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
        assert_eq!(arena.capacity(), 1);
    }

    #[test]
    fn double_remove_is_none() {
        let mut arena: Arena<TestKey, u32> = Arena::new();
        let a = arena.insert(7);
        assert_eq!(arena.remove(a), Some(7));
        assert_eq!(arena.remove(a), None);
        assert!(arena.is_empty());
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena: Arena<TestKey, u32> = Arena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        let _c = arena.insert(3);
        arena.remove(a);

        let values: Vec<u32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2, 3]);
    }
}
