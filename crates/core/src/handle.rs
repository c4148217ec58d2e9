//! Generation-checked handle table.
//!
//! Objects handed across the bridge boundary are identified by a [`Handle`]
//! rather than by their address. A handle packs a slot index and the slot's
//! generation; removing an object bumps the generation, so a handle kept after
//! destruction never resolves to whatever object reuses the slot later.
//!
//! # Example
//!
//! ```
//! use bridge_core::{Handle, HandleTable};
//!
//! let mut table = HandleTable::new();
//! let a = table.insert("first");
//! assert_eq!(table.get(a), Some(&"first"));
//!
//! table.remove(a);
//! let b = table.insert("second");
//! assert_eq!(table.get(a), None);
//! assert_eq!(table.get(b), Some(&"second"));
//! assert!(!Handle::NULL.is_valid());
//! ```

use std::fmt;

/// Opaque identifier for a bridge object.
///
/// Always 64 bits wide, including on 32-bit targets, so the generation is
/// never truncated. Hosts declare it as `uint64_t`, not as a pointer type.
///
/// Layout: generation in the high 32 bits, slot index in the low 32 bits.
/// Generations start at 1, so `0` is never a live handle.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    /// The null handle, returned by every failed creation.
    pub const NULL: Handle = Handle(0);

    /// Reinterprets a raw boundary value as a handle.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw boundary value.
    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// True for anything other than [`Handle::NULL`]. Says nothing about liveness.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    #[inline]
    fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    #[inline]
    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}v{})", self.index(), self.generation())
        } else {
            f.write_str("Handle(null)")
        }
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of objects addressed by generation-checked [`Handle`]s.
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> HandleTable<T> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns a fresh handle for it.
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 1,
            value: Some(value),
        });
        Handle::new(index, 1)
    }

    /// Resolves a handle, or `None` for null, stale, or foreign handles.
    pub fn get(&self, handle: Handle) -> Option<&T> {
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    /// Mutable variant of [`HandleTable::get`].
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Mutable access to two distinct live objects at once.
    ///
    /// Returns `None` if either handle does not resolve or both name the same slot.
    pub fn get2_mut(&mut self, a: Handle, b: Handle) -> Option<(&mut T, &mut T)> {
        let [slot_a, slot_b] = self.slots.get_disjoint_mut([a.index(), b.index()]).ok()?;
        if slot_a.generation != a.generation() || slot_b.generation != b.generation() {
            return None;
        }
        Some((slot_a.value.as_mut()?, slot_b.value.as_mut()?))
    }

    /// True if `handle` currently resolves.
    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Removes and returns the object. A second call with the same handle returns `None`.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;

        // A slot whose generation would wrap is retired instead of recycled.
        slot.generation = slot.generation.wrapping_add(1);
        if slot.generation != 0 {
            self.free.push(handle.index() as u32);
        }
        self.len -= 1;
        Some(value)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no object is live.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over live objects with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }

    /// Mutable variant of [`HandleTable::iter`].
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (Handle::new(index as u32, generation), value))
        })
    }

    /// Removes every live object, newest slot first, invalidating all handles.
    pub fn drain(&mut self) -> Vec<T> {
        let handles: Vec<Handle> = self.iter().map(|(handle, _)| handle).collect();
        handles
            .into_iter()
            .rev()
            .filter_map(|handle| self.remove(handle))
            .collect()
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_null_handle() {
        let table: HandleTable<u32> = HandleTable::new();
        assert!(!Handle::NULL.is_valid());
        assert_eq!(Handle::NULL.to_raw(), 0);
        assert_eq!(table.get(Handle::NULL), None);
    }

    #[test]
    fn test_handle_is_64_bits_on_every_target() {
        assert_eq!(std::mem::size_of::<Handle>(), 8);

        let mut table = HandleTable::new();
        let mut handle = table.insert(0u32);
        for _ in 0..3 {
            table.remove(handle);
            handle = table.insert(0u32);
        }
        // Generation bits sit above any 32-bit pointer.
        assert!(handle.to_raw() > u64::from(u32::MAX));
        assert_eq!(Handle::from_raw(handle.to_raw()), handle);
        assert_eq!(table.get(Handle::from_raw(handle.to_raw())), Some(&0));
    }

    #[test]
    fn test_first_handle_is_not_null() {
        let mut table = HandleTable::new();
        let handle = table.insert(7u32);
        assert!(handle.is_valid());
        assert_eq!(table.get(handle), Some(&7));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut table = HandleTable::new();
        let handle = table.insert(String::from("window"));
        assert_eq!(table.remove(handle).as_deref(), Some("window"));
        assert_eq!(table.remove(handle), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_stale_handle_does_not_alias_reused_slot() {
        let mut table = HandleTable::new();
        let old = table.insert(1u32);
        table.remove(old);
        let new = table.insert(2u32);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(table.get(old), None);
        assert_eq!(table.get(new), Some(&2));
        assert_eq!(table.remove(old), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_foreign_handle_rejected() {
        let mut table = HandleTable::new();
        table.insert(1u32);
        assert_eq!(table.get(Handle::from_raw(0xDEAD_BEEF_0000_0000)), None);
        assert_eq!(table.get(Handle::from_raw(u64::MAX)), None);
    }

    #[test]
    fn test_get2_mut_disjoint() {
        let mut table = HandleTable::new();
        let a = table.insert(1u32);
        let b = table.insert(2u32);

        let (x, y) = table.get2_mut(a, b).unwrap();
        std::mem::swap(x, y);
        assert_eq!(table.get(a), Some(&2));
        assert_eq!(table.get(b), Some(&1));

        assert!(table.get2_mut(a, a).is_none());
        table.remove(b);
        assert!(table.get2_mut(a, b).is_none());
    }

    #[test]
    fn test_drain_invalidates_everything() {
        let mut table = HandleTable::new();
        let handles: Vec<_> = (0..4u32).map(|i| table.insert(i)).collect();
        let drained = table.drain();
        assert_eq!(drained, vec![3, 2, 1, 0]);
        assert!(table.is_empty());
        assert!(handles.iter().all(|&h| !table.contains(h)));
    }

    #[test]
    fn test_iter_mut_updates_in_place() {
        let mut table = HandleTable::new();
        let a = table.insert(1u32);
        let b = table.insert(2u32);
        for (_, value) in table.iter_mut() {
            *value *= 10;
        }
        assert_eq!(table.get(a), Some(&10));
        assert_eq!(table.get(b), Some(&20));
    }

    #[test]
    fn test_debug_format() {
        let mut table = HandleTable::new();
        let handle = table.insert(());
        assert_eq!(format!("{:?}", handle), "Handle(0v1)");
        assert_eq!(format!("{:?}", Handle::NULL), "Handle(null)");
    }

    proptest! {
        #[test]
        fn removed_handles_never_resolve(ops in proptest::collection::vec(any::<bool>(), 1..200)) {
            let mut table = HandleTable::new();
            let mut live = Vec::new();
            let mut dead = Vec::new();

            for (step, insert) in ops.into_iter().enumerate() {
                if insert || live.is_empty() {
                    live.push((table.insert(step), step));
                } else {
                    let (handle, value) = live.remove(step % live.len());
                    prop_assert_eq!(table.remove(handle), Some(value));
                    dead.push(handle);
                }
            }

            prop_assert_eq!(table.len(), live.len());
            for (handle, value) in &live {
                prop_assert!(handle.is_valid());
                prop_assert_eq!(table.get(*handle), Some(value));
            }
            for handle in &dead {
                prop_assert!(!table.contains(*handle));
            }
        }
    }
}
