// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The bookkeeping every IPC object family carries, regardless of what it
//! is used for.
//!
//! [`signal`](crate::signal), [`channel`](crate::channel),
//! [`event`](crate::event), and [`shm`](crate::shm) each define their own
//! state struct and embed an [`ObjectMeta`] in it, behind a `spin::Mutex`
//! guarding the whole thing (state plus metadata plus wait queues). This
//! module only factors out the three things that are otherwise duplicated
//! four times: the handle's generation, the destroyed flag, and the count
//! of tasks currently blocked on the object.

use magnolia_abi::{CommonInfo, Generation};

/// Metadata common to every live object, independent of its family.
///
/// An object becomes permanently unusable once [`ObjectMeta::destroy`] is
/// called: its generation is never reused until the registry slot itself
/// is released and reallocated (see [`crate::registry`]).
#[derive(Clone, Copy, Debug)]
pub struct ObjectMeta {
    generation: Generation,
    destroyed: bool,
    waiting_tasks: u32,
}

impl ObjectMeta {
    /// Creates metadata for a freshly allocated slot.
    pub fn new(generation: Generation) -> Self {
        ObjectMeta {
            generation,
            destroyed: false,
            waiting_tasks: 0,
        }
    }

    /// The generation this object was created with.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether [`ObjectMeta::destroy`] has been called.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Marks the object destroyed. Idempotent: calling this more than once
    /// has no further effect. Callers are responsible for waking whatever
    /// wait queues the object owns with `WakeResult::ObjectDestroyed`
    /// immediately after this returns `true` for the first time.
    pub fn destroy(&mut self) -> bool {
        if self.destroyed {
            false
        } else {
            self.destroyed = true;
            true
        }
    }

    /// Called when a task is about to be enqueued on one of this object's
    /// wait queues.
    pub fn waiter_added(&mut self) {
        self.waiting_tasks += 1;
    }

    /// Called once a previously added waiter has been removed, woken or
    /// not.
    pub fn waiter_removed(&mut self) {
        self.waiting_tasks = self.waiting_tasks.saturating_sub(1);
    }

    /// Total tasks currently blocked across all of this object's queues.
    pub fn waiting_tasks(&self) -> u32 {
        self.waiting_tasks
    }

    /// The family-independent portion of a diagnostic snapshot.
    pub fn common_info(&self) -> CommonInfo {
        CommonInfo {
            destroyed: self.destroyed,
            waiting_tasks: self.waiting_tasks,
        }
    }
}
