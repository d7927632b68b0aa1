//! Generation-checked slot storage.
//!
//! [`Arena<T>`] hands out [`ArenaHandle`]s made of a slot index and the
//! generation the slot had when the value was inserted. Removing a value bumps
//! the slot's generation, so a handle captured before the slot was reused no
//! longer resolves: lookups with a stale handle return `None` instead of
//! aliasing the new occupant.
//!
//! Freed slots are recycled lowest-index-first from a free list, which keeps
//! the storage dense when objects are created and destroyed every frame.
//!
//! # Example
//!
//! ```
//! use redlilium_core::Arena;
//!
//! let mut arena = Arena::new();
//! let a = arena.insert("texture.png");
//! assert_eq!(arena.get(a), Some(&"texture.png"));
//!
//! arena.remove(a);
//! let b = arena.insert("mesh.gltf");
//!
//! // Same slot, different generation.
//! assert_eq!(a.index(), b.index());
//! assert_ne!(a, b);
//! assert!(arena.get(a).is_none());
//! ```

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;

/// Handle to a value stored in an [`Arena`].
///
/// Two handles are equal when both the slot index and the generation match.
/// Generation `0` is never assigned, so [`ArenaHandle::INVALID`] never
/// resolves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaHandle {
    index: u32,
    generation: u32,
}

impl ArenaHandle {
    /// A handle that never resolves.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    /// Returns the slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Returns the generation the slot had when this handle was created.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Returns `false` for [`ArenaHandle::INVALID`].
    pub fn is_valid(&self) -> bool {
        self.generation != 0
    }

    /// Packs index and generation into one value, e.g. for hashing or logging.
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }
}

impl Default for ArenaHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for ArenaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Dense slot storage with generation-checked handles.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: BinaryHeap<Reverse<u32>>,
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: BinaryHeap::new(),
            len: 0,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no value is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value and returns its handle.
    pub fn insert(&mut self, value: T) -> ArenaHandle {
        self.insert_with(|_| value)
    }

    /// Stores the value built by `create`, which receives the handle the
    /// value will be stored under.
    pub fn insert_with(&mut self, create: impl FnOnce(ArenaHandle) -> T) -> ArenaHandle {
        self.len += 1;

        if let Some(Reverse(index)) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            let handle = ArenaHandle {
                index,
                generation: slot.generation,
            };
            slot.value = Some(create(handle));
            return handle;
        }

        let handle = ArenaHandle {
            index: self.slots.len() as u32,
            generation: 1,
        };
        self.slots.push(Slot {
            generation: 1,
            value: Some(create(handle)),
        });
        handle
    }

    /// Removes the value behind `handle`, invalidating every copy of it.
    ///
    /// Returns `None` if the handle is stale.
    pub fn remove(&mut self, handle: ArenaHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(Reverse(handle.index));
        self.len -= 1;
        Some(value)
    }

    /// Returns `true` if `handle` refers to a live value.
    pub fn contains(&self, handle: ArenaHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Borrows the value behind `handle`.
    pub fn get(&self, handle: ArenaHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutably borrows the value behind `handle`.
    pub fn get_mut(&mut self, handle: ArenaHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Iterates over live values with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    ArenaHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }

    /// Handles of all live values, in slot order.
    pub fn handles(&self) -> Vec<ArenaHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&10));
        assert_eq!(arena.get(b), Some(&20));
        *arena.get_mut(b).unwrap() = 21;
        assert_eq!(arena.get(b), Some(&21));
    }

    #[test]
    fn stale_handle_does_not_resolve_after_reuse() {
        let mut arena = Arena::new();
        let old = arena.insert("old");
        assert_eq!(arena.remove(old), Some("old"));
        let new = arena.insert("new");

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert!(arena.get(old).is_none());
        assert!(arena.remove(old).is_none());
        assert_eq!(arena.get(new), Some(&"new"));
    }

    #[test]
    fn invalid_handle_never_resolves() {
        let mut arena = Arena::new();
        arena.insert(1);
        assert!(!ArenaHandle::INVALID.is_valid());
        assert!(arena.get(ArenaHandle::INVALID).is_none());
        assert_eq!(ArenaHandle::default(), ArenaHandle::INVALID);
    }

    #[test]
    fn free_slots_reused_lowest_first() {
        let mut arena = Arena::new();
        let handles: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(handles[3]);
        arena.remove(handles[1]);
        let reused = arena.insert(99);
        assert_eq!(reused.index(), 1);
        assert_eq!(arena.len(), 3);
    }

    #[test]
    fn insert_with_sees_own_handle() {
        let mut arena = Arena::new();
        let first = arena.insert_with(|handle| handle);
        assert_eq!(arena.get(first), Some(&first));

        arena.remove(first);
        let second = arena.insert_with(|handle| handle);
        assert_eq!(arena.get(second), Some(&second));
        assert_ne!(first, second);
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut arena = Arena::new();
        let a = arena.insert('a');
        let b = arena.insert('b');
        let c = arena.insert('c');
        arena.remove(b);
        let live: Vec<_> = arena.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, vec![(a, 'a'), (c, 'c')]);
        assert_eq!(arena.handles(), vec![a, c]);
    }
}
