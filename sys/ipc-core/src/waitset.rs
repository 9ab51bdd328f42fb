// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Waitset listeners: the edge-triggered callback mechanism that lets a
//! single blocking call multiplex several objects.
//!
//! Each object family embeds a [`Listeners`] alongside its other state.
//! Subscribing attaches a plain function pointer and an opaque user-data
//! pointer, mirroring how the rest of this crate's host (and the original
//! firmware this is modeled on) prefers C-style callbacks over trait
//! objects in paths that must stay `no_std` and allocation-free.
//!
//! A listener is only called when readiness *changes* (edge-triggered),
//! except for two fixed points: once immediately on subscribe, with
//! whatever the current state is, and once on the object's destruction,
//! always reporting not-ready. Every call happens with the object's lock
//! released: family modules collect due callbacks into a small buffer
//! while holding the lock, then invoke them afterward.

use magnolia_abi::Status;

/// Maximum number of listeners a single object can carry at once.
pub const MAX_LISTENERS_PER_OBJECT: usize = 4;

/// A callback invoked when an object's readiness changes.
///
/// `ready` reports the object's new state; `user_data` is returned
/// verbatim from whatever was passed to [`Listeners::subscribe`].
pub type ReadyCallback = fn(ready: bool, user_data: *mut core::ffi::c_void);

#[derive(Clone, Copy)]
struct Entry {
    callback: ReadyCallback,
    user_data: *mut core::ffi::c_void,
    last_ready: bool,
}

// Safety: `user_data` is never dereferenced by this module; it is only
// ever handed back to the callback that registered it, which is
// responsible for its own synchronization.
unsafe impl Send for Entry {}

/// A single due invocation, to be made once the object's lock is no
/// longer held.
#[derive(Clone, Copy)]
pub struct DueCallback {
    callback: ReadyCallback,
    user_data: *mut core::ffi::c_void,
    ready: bool,
}

impl DueCallback {
    /// Invokes this callback. Must not be called while any object lock is
    /// held.
    pub fn invoke(self) {
        (self.callback)(self.ready, self.user_data);
    }
}

/// A buffer of callbacks collected while an object's lock was held,
/// waiting to be invoked once it is released.
pub type DueCallbacks = heapless::Vec<DueCallback, MAX_LISTENERS_PER_OBJECT>;

/// The set of listeners attached to one object.
pub struct Listeners {
    entries: heapless::Vec<Entry, MAX_LISTENERS_PER_OBJECT>,
}

impl Listeners {
    /// An empty listener set.
    pub const fn new() -> Self {
        Listeners {
            entries: heapless::Vec::new(),
        }
    }

    /// Attaches a listener, returning the one callback that must be
    /// invoked immediately (with the object's current readiness) once the
    /// caller has released the object's lock.
    pub fn subscribe(
        &mut self,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
        current_ready: bool,
    ) -> Result<DueCallback, Status> {
        self.entries
            .push(Entry {
                callback,
                user_data,
                last_ready: current_ready,
            })
            .map_err(|_| Status::NoSpace)?;
        Ok(DueCallback {
            callback,
            user_data,
            ready: current_ready,
        })
    }

    /// Detaches a previously subscribed listener. Returns
    /// [`Status::InvalidArgument`] if no matching listener is attached.
    pub fn unsubscribe(
        &mut self,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        match self.entries.iter().position(|e| {
            e.callback as usize == callback as usize && e.user_data == user_data
        }) {
            Some(pos) => {
                self.entries.swap_remove(pos);
                Ok(())
            }
            None => Err(Status::InvalidArgument),
        }
    }

    /// Call after any mutation that may have changed the object's
    /// readiness. Collects a callback for every listener whose observed
    /// state differs from `ready`, updating its stored state, and leaves
    /// callbacks for listeners whose state is unchanged uncollected.
    pub fn notify(&mut self, ready: bool) -> DueCallbacks {
        let mut due = DueCallbacks::new();
        for entry in self.entries.iter_mut() {
            if entry.last_ready != ready {
                entry.last_ready = ready;
                // A full buffer here would mean more listeners changed
                // state than this object can hold in the first place,
                // which cannot happen since `entries` shares the same
                // capacity.
                let _ = due.push(DueCallback {
                    callback: entry.callback,
                    user_data: entry.user_data,
                    ready,
                });
            }
        }
        due
    }

    /// Call exactly once, when the object is destroyed. Every attached
    /// listener receives one final not-ready callback, regardless of its
    /// last observed state, and the listener set is cleared.
    pub fn notify_destroyed(&mut self) -> DueCallbacks {
        let mut due = DueCallbacks::new();
        while let Some(entry) = self.entries.pop() {
            let _ = due.push(DueCallback {
                callback: entry.callback,
                user_data: entry.user_data,
                ready: false,
            });
        }
        due
    }

    /// Number of listeners currently attached.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no listener is attached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    thread_local! {
        static LOG: RefCell<Vec<bool>> = RefCell::new(Vec::new());
    }

    fn record(ready: bool, _user_data: *mut core::ffi::c_void) {
        LOG.with(|l| l.borrow_mut().push(ready));
    }

    fn clear_log() {
        LOG.with(|l| l.borrow_mut().clear());
    }

    fn log() -> Vec<bool> {
        LOG.with(|l| l.borrow().clone())
    }

    #[test]
    fn subscribe_fires_with_current_state() {
        clear_log();
        let mut listeners = Listeners::new();
        let due = listeners.subscribe(record, core::ptr::null_mut(), true).unwrap();
        due.invoke();
        assert_eq!(log(), vec![true]);
    }

    #[test]
    fn notify_is_edge_triggered() {
        clear_log();
        let mut listeners = Listeners::new();
        listeners
            .subscribe(record, core::ptr::null_mut(), false)
            .unwrap()
            .invoke();

        // No change: nothing should fire.
        let due = listeners.notify(false);
        assert!(due.is_empty());

        // Becomes ready: fires once.
        let due = listeners.notify(true);
        for d in due {
            d.invoke();
        }
        // Stays ready: nothing further.
        let due = listeners.notify(true);
        assert!(due.is_empty());

        assert_eq!(log(), vec![false, true]);
    }

    #[test]
    fn destroy_always_fires_not_ready_once() {
        clear_log();
        let mut listeners = Listeners::new();
        listeners
            .subscribe(record, core::ptr::null_mut(), false)
            .unwrap()
            .invoke();
        clear_log();

        let due = listeners.notify_destroyed();
        for d in due {
            d.invoke();
        }
        assert_eq!(log(), vec![false]);
        assert!(listeners.is_empty());
    }

    #[test]
    fn unsubscribe_unknown_listener_is_invalid_argument() {
        let mut listeners = Listeners::new();
        assert_eq!(
            listeners.unsubscribe(record, core::ptr::null_mut()),
            Err(Status::InvalidArgument)
        );
    }
}
