// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thin trait interfaces to the outside world.
//!
//! The core never touches a scheduler's run queue, never reads a hardware
//! timer, and never calls a real allocator directly. It only knows about
//! the handful of operations declared here, which a host implements.

use crate::abi::WakeResult;

/// Bridges the core to whatever task scheduler hosts it.
///
/// Implementations are free to represent a task however they like; the
/// core only ever stores and compares `Task` handles, it never inspects
/// them.
///
/// # Wake-before-park
///
/// `unpark` may be called for a task that has not yet called `park` for
/// this wait (the waiter was enqueued and the object's lock released, but
/// the scheduler has not yet context-switched away). Implementations must
/// treat the outcome as sticky in that case: the next `park` call for that
/// task returns it immediately rather than blocking. This mirrors the
/// sticky notification bits used elsewhere in the kernel and is what makes
/// the prepare/enqueue/unlock/block protocol in [`crate::waitq`] race-free
/// without a third lock.
pub trait Scheduler {
    /// An opaque handle naming one task.
    type Task: Copy + Eq;

    /// Returns a handle for the task that is currently executing.
    fn current_task(&self) -> Self::Task;

    /// Blocks the calling task until it is woken with [`Scheduler::unpark`]
    /// or, if `deadline_us` is `Some`, until that many microseconds (as
    /// measured by the associated [`Clock`]) have elapsed.
    ///
    /// `task` must be the caller's own handle, as returned by
    /// [`Scheduler::current_task`].
    fn park(&self, task: Self::Task, deadline_us: Option<u64>) -> WakeResult;

    /// Wakes `task`, delivering `result` to its `park` call.
    ///
    /// Called with the relevant object's lock held, so implementations must
    /// not block or attempt to reacquire that lock.
    fn unpark(&self, task: Self::Task, result: WakeResult);
}

/// A monotonic, microsecond-resolution clock.
pub trait Clock {
    /// Returns the current time in microseconds since an arbitrary epoch
    /// fixed at boot. Never goes backwards.
    fn now_us(&self) -> u64;
}

/// Supplies backing storage for shared-memory regions.
///
/// Allocation happens once, at region creation; the core never resizes or
/// frees a region behind the caller's back. `deallocate` is called exactly
/// once, when the region's last attachment is dropped and the region is
/// destroyed.
///
/// # Safety
///
/// `allocate` must return a region of at least `size` bytes that is valid
/// for reads and writes for as long as the core holds it, and `deallocate`
/// must be passed the exact pointer and size previously returned by
/// `allocate`.
pub unsafe trait ShmAllocator {
    /// Allocates `size` bytes of zeroed storage, or returns `None` if none
    /// is available.
    fn allocate(&self, size: usize) -> Option<core::ptr::NonNull<u8>>;

    /// Releases a region previously returned by `allocate`.
    fn deallocate(&self, ptr: core::ptr::NonNull<u8>, size: usize);
}
