// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generational handle registries.
//!
//! Each object family (signals, channels, event flags, shared-memory
//! regions) owns one `Registry<T, N>`, where `T` is that family's state
//! type and `N` is the fixed number of objects it can hold at once. A slot
//! is identified by its index plus a [`Generation`] that is bumped every
//! time the slot is reused, so a stale [`Handle`] captured before a
//! release-then-reallocate cycle is reliably rejected rather than
//! aliasing whatever now occupies the slot.

use magnolia_abi::{Generation, Handle, ObjectType, Status};
use unwrap_lite::UnwrapLite;

struct Slot<T> {
    generation: Generation,
    occupied: bool,
    value: Option<T>,
    /// Set to the slot's generation by [`Registry::release`] and cleared by
    /// the next [`Registry::allocate`] into this slot. Lets a handle whose
    /// object was just destroyed keep resolving to
    /// [`Status::ObjectDestroyed`] rather than [`Status::InvalidHandle`]
    /// until the slot is actually recycled, matching the data model's
    /// "subsequent operations fail with INVALID_HANDLE once the generation
    /// advances" rule.
    destroyed_generation: Option<Generation>,
}

/// A fixed-capacity table of generational handles to `T`, all tagged with
/// the same [`ObjectType`].
///
/// `N` must not exceed [`magnolia_abi::MAX_OBJECTS_PER_FAMILY`]; indices
/// beyond that cannot be represented in a [`Handle`].
pub struct Registry<T, const N: usize> {
    object_type: ObjectType,
    slots: [Slot<T>; N],
}

impl<T, const N: usize> Registry<T, N> {
    /// Creates an empty registry for objects of `object_type`.
    pub fn new(object_type: ObjectType) -> Self {
        Registry {
            object_type,
            slots: core::array::from_fn(|_| Slot {
                generation: Generation(0),
                occupied: false,
                value: None,
                destroyed_generation: None,
            }),
        }
    }

    /// Finds a free slot, stores `value` in it, and returns a handle
    /// naming it. The slot's generation is bumped before the handle is
    /// minted, so a handle from a prior occupant of this slot (if any)
    /// will not validate against the new occupant.
    pub fn allocate(&mut self, value: T) -> Result<Handle, Status> {
        let object_type = self.object_type;
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| !s.occupied)
            .ok_or(Status::NoSpace)?;
        slot.occupied = true;
        slot.generation = slot.generation.next();
        slot.value = Some(value);
        slot.destroyed_generation = None;
        Ok(Handle::pack(index as u32, object_type, slot.generation))
    }

    /// Validates `handle` against this registry without removing it.
    pub fn get(&self, handle: Handle) -> Result<&T, Status> {
        let slot = self.lookup(handle)?;
        Ok(slot.value.as_ref().unwrap_lite())
    }

    /// Validates `handle` and returns a mutable reference to its value.
    pub fn get_mut(&mut self, handle: Handle) -> Result<&mut T, Status> {
        let slot = self.lookup_mut(handle)?;
        Ok(slot.value.as_mut().unwrap_lite())
    }

    /// Validates `handle`, removes its slot's value, and frees the slot
    /// for reuse. The slot's generation is left as-is; it is bumped again
    /// the next time [`Registry::allocate`] reuses this index. Until then,
    /// this same `handle` keeps resolving — through [`Registry::get`] and
    /// [`Registry::get_mut`], as [`Status::ObjectDestroyed`] rather than
    /// disappearing straight to [`Status::InvalidHandle`].
    pub fn release(&mut self, handle: Handle) -> Result<T, Status> {
        let slot = self.lookup_mut(handle)?;
        slot.occupied = false;
        slot.destroyed_generation = Some(slot.generation);
        Ok(slot.value.take().unwrap_lite())
    }

    fn lookup(&self, handle: Handle) -> Result<&Slot<T>, Status> {
        let index = handle.index() as usize;
        if handle.object_type() != Some(self.object_type) {
            return Err(Status::InvalidHandle);
        }
        let slot = self.slots.get(index).ok_or(Status::InvalidHandle)?;
        if slot.occupied && slot.generation == handle.generation() {
            return Ok(slot);
        }
        if !slot.occupied && slot.destroyed_generation == Some(handle.generation()) {
            return Err(Status::ObjectDestroyed);
        }
        Err(Status::InvalidHandle)
    }

    fn lookup_mut(&mut self, handle: Handle) -> Result<&mut Slot<T>, Status> {
        let index = handle.index() as usize;
        if handle.object_type() != Some(self.object_type) {
            return Err(Status::InvalidHandle);
        }
        let slot = self.slots.get_mut(index).ok_or(Status::InvalidHandle)?;
        if slot.occupied && slot.generation == handle.generation() {
            return Ok(slot);
        }
        if !slot.occupied && slot.destroyed_generation == Some(handle.generation()) {
            return Err(Status::ObjectDestroyed);
        }
        Err(Status::InvalidHandle)
    }

    /// Number of slots currently occupied.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    /// True if every slot is free.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_get_roundtrip() {
        let mut r: Registry<u32, 4> = Registry::new(ObjectType::Signal);
        let h = r.allocate(7).unwrap();
        assert_eq!(*r.get(h).unwrap(), 7);
    }

    #[test]
    fn stale_handle_rejected_after_reuse() {
        let mut r: Registry<u32, 4> = Registry::new(ObjectType::Channel);
        let h1 = r.allocate(1).unwrap();
        assert_eq!(r.release(h1).unwrap(), 1);
        let h2 = r.allocate(2).unwrap();
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.generation(), h2.generation());
        assert_eq!(r.get(h1), Err(Status::InvalidHandle));
        assert_eq!(*r.get(h2).unwrap(), 2);
    }

    #[test]
    fn wrong_object_type_rejected() {
        let mut r: Registry<u32, 4> = Registry::new(ObjectType::Signal);
        let h = r.allocate(1).unwrap();
        let forged = Handle::pack(h.index(), ObjectType::Channel, h.generation());
        assert_eq!(r.get(forged), Err(Status::InvalidHandle));
    }

    #[test]
    fn exhausted_registry_returns_no_space() {
        let mut r: Registry<u32, 2> = Registry::new(ObjectType::EventFlags);
        r.allocate(1).unwrap();
        r.allocate(2).unwrap();
        assert_eq!(r.allocate(3), Err(Status::NoSpace));
    }

    #[test]
    fn released_slot_is_reusable() {
        let mut r: Registry<u32, 1> = Registry::new(ObjectType::Shm);
        let h = r.allocate(1).unwrap();
        r.release(h).unwrap();
        assert!(r.allocate(2).is_ok());
    }

    #[test]
    fn released_handle_reports_object_destroyed_until_reallocated() {
        let mut r: Registry<u32, 1> = Registry::new(ObjectType::Signal);
        let h = r.allocate(1).unwrap();
        r.release(h).unwrap();
        assert_eq!(r.get(h), Err(Status::ObjectDestroyed));
        assert_eq!(r.get_mut(h).map(|_| ()), Err(Status::ObjectDestroyed));
        assert_eq!(r.release(h).map(|_| ()), Err(Status::ObjectDestroyed));

        let h2 = r.allocate(2).unwrap();
        assert_eq!(h.index(), h2.index());
        assert_eq!(r.get(h), Err(Status::InvalidHandle));
    }
}
