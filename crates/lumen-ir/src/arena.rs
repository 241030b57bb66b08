//! Slot arena with typed handles.
//!
//! Handles are never reused: removing a value vacates its slot, and any
//! later access through that handle is a bug.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A typed handle into an [`Arena`].
pub struct Handle<T> {
    index: u32,
    _phantom: PhantomData<T>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.index)
    }
}

impl<T> Handle<T> {
    pub(crate) fn new(index: u32) -> Self {
        Self {
            index,
            _phantom: PhantomData,
        }
    }

    /// Returns the zero-based slot index of this handle.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// An append-only arena whose slots can be vacated.
#[derive(Clone, Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Number of live values.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Appends a value and returns its handle.
    pub fn append(&mut self, value: T) -> Handle<T> {
        let index = u32::try_from(self.slots.len()).unwrap_or_else(|_| {
            panic!("arena overflow: {} slots exceeds u32::MAX", self.slots.len())
        });
        self.slots.push(Some(value));
        self.live += 1;
        Handle::new(index)
    }

    /// Vacates the slot, returning its value. Returns `None` if the slot was
    /// already vacant.
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let taken = self.slots.get_mut(handle.index()).and_then(Option::take);
        if taken.is_some() {
            self.live -= 1;
        }
        taken
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.try_get(handle).is_some()
    }

    pub fn try_get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots.get(handle.index()).and_then(Option::as_ref)
    }

    pub fn try_get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.index()).and_then(Option::as_mut)
    }

    /// Handles of all live values, in insertion order.
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// Iterates over live `(handle, &value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        // Slot count is bounded by u32::MAX (enforced in append).
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (Handle::new(i as u32), v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, v)| v.as_mut().map(|v| (Handle::new(i as u32), v)))
    }
}

impl<T> Index<Handle<T>> for Arena<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        self.try_get(handle)
            .unwrap_or_else(|| panic!("stale handle {handle:?}"))
    }
}

impl<T> IndexMut<Handle<T>> for Arena<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        self.try_get_mut(handle)
            .unwrap_or_else(|| panic!("stale handle {handle:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_access() {
        let mut arena = Arena::new();
        let h0 = arena.append("hello");
        let h1 = arena.append("world");
        assert_eq!(arena[h0], "hello");
        assert_eq!(arena[h1], "world");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn removed_slots_are_skipped() {
        let mut arena = Arena::new();
        let a = arena.append(10);
        let b = arena.append(20);
        let c = arena.append(30);
        assert_eq!(arena.remove(b), Some(20));
        assert_eq!(arena.remove(b), None);
        assert_eq!(arena.len(), 2);
        assert!(!arena.contains(b));
        assert_eq!(arena.handles(), vec![a, c]);

        let d = arena.append(40);
        assert_eq!(d.index(), 3);
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn stale_handle_panics() {
        let mut arena = Arena::new();
        let h = arena.append(1u8);
        arena.remove(h);
        let _ = arena[h];
    }

    #[test]
    fn handle_ordering() {
        let h0: Handle<u32> = Handle::new(0);
        let h1: Handle<u32> = Handle::new(1);
        assert!(h0 < h1);
        assert_eq!(h0, h0);
    }
}
