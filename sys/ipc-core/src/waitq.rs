// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Intrusive, FIFO wait queues.
//!
//! Every blocking operation in this crate follows the same shape:
//!
//! 1. While holding the object's lock, build a [`Waiter`] on the stack and
//!    [`WaitQueue::enqueue`] it.
//! 2. Drop the lock.
//! 3. Call [`crate::sched::Scheduler::park`] and block.
//! 4. Reacquire the lock, [`WaitQueue::remove`] the waiter (a no-op if it
//!    was already popped by a waker), and translate the outcome.
//!
//! A [`Waiter`]'s storage lives on the blocked task's own stack frame, not
//! in any allocator: the queue only ever stores pointers into that frame,
//! and it is sound because step 4 always runs, on every path (including
//! timeout), before the frame is torn down.

use core::cell::Cell;
use core::pin::Pin;
use core::ptr::NonNull;

use crate::sched::Scheduler;
use magnolia_abi::WakeResult;

/// A node linking one blocked task into a [`WaitQueue`].
///
/// `P` carries whatever a particular object family needs to decide if this
/// waiter is satisfied by a given state change (for example, an event-flags
/// wait stores the requested mask and wait mode here). Object families that
/// wake in strict FIFO order with no per-waiter condition use `P = ()`.
pub struct Waiter<T, P = ()> {
    next: Cell<Option<NonNull<Waiter<T, P>>>>,
    task: T,
    predicate: P,
}

impl<T: Copy, P> Waiter<T, P> {
    /// Creates a new, unlinked waiter for `task`.
    pub fn new(task: T, predicate: P) -> Self {
        Waiter {
            next: Cell::new(None),
            task,
            predicate,
        }
    }

    /// The task this waiter blocks.
    pub fn task(&self) -> T {
        self.task
    }

    /// The per-family condition attached to this waiter.
    pub fn predicate(&self) -> &P {
        &self.predicate
    }
}

/// A FIFO queue of blocked tasks, ordered by arrival.
///
/// Not `Sync` by accident: every method here assumes the caller already
/// holds whatever lock protects the containing object, matching how the
/// rest of this crate protects its queues.
pub struct WaitQueue<T, P = ()> {
    head: Cell<Option<NonNull<Waiter<T, P>>>>,
    tail: Cell<Option<NonNull<Waiter<T, P>>>>,
    len: Cell<usize>,
}

// Safety: access is always externally serialized by the lock guarding the
// object a WaitQueue lives in. The queue itself never runs concurrently.
unsafe impl<T: Send, P: Send> Send for WaitQueue<T, P> {}

impl<T: Copy, P> WaitQueue<T, P> {
    /// An empty queue.
    pub const fn new() -> Self {
        WaitQueue {
            head: Cell::new(None),
            tail: Cell::new(None),
            len: Cell::new(0),
        }
    }

    /// Number of waiters currently queued.
    pub fn len(&self) -> usize {
        self.len.get()
    }

    /// True if no task is queued.
    pub fn is_empty(&self) -> bool {
        self.len.get() == 0
    }

    /// Links `waiter` onto the tail of the queue.
    ///
    /// # Safety contract
    ///
    /// The caller must call [`WaitQueue::remove`] on this same waiter
    /// before the waiter's storage goes out of scope, even on a timeout or
    /// error path. `Pin` enforces that the waiter cannot be moved while
    /// linked; it does not, by itself, enforce that it outlives the link,
    /// so callers must follow the prepare/block/remove protocol exactly.
    pub fn enqueue(&self, waiter: Pin<&Waiter<T, P>>) {
        let ptr = NonNull::from(waiter.get_ref());
        // Safety: `ptr` was just derived from a live reference and is not
        // yet linked into any queue, so writing its `next` cell is sound.
        unsafe { ptr.as_ref().next.set(None) };
        match self.tail.get() {
            None => self.head.set(Some(ptr)),
            // Safety: every pointer reachable from `tail` was enqueued
            // through this method and remains valid until `remove`d.
            Some(tail) => unsafe { tail.as_ref().next.set(Some(ptr)) },
        }
        self.tail.set(Some(ptr));
        self.len.set(self.len.get() + 1);
    }

    /// Unlinks `waiter` by identity (pointer equality), if it is still
    /// queued. Returns whether it was found; a waiter already popped by a
    /// wake is simply not found, which is the common case on the
    /// successful-wake path.
    pub fn remove(&self, waiter: Pin<&Waiter<T, P>>) -> bool {
        let target = NonNull::from(waiter.get_ref());
        let mut prev: Option<NonNull<Waiter<T, P>>> = None;
        let mut cur = self.head.get();
        while let Some(node) = cur {
            // Safety: every node on this list was linked via `enqueue` and
            // has not yet been unlinked, so it is still valid.
            let next = unsafe { node.as_ref().next.get() };
            if node == target {
                match prev {
                    Some(p) => unsafe { p.as_ref().next.set(next) },
                    None => self.head.set(next),
                }
                if self.tail.get() == Some(node) {
                    self.tail.set(prev);
                }
                self.len.set(self.len.get() - 1);
                return true;
            }
            prev = Some(node);
            cur = next;
        }
        false
    }

    fn pop_front(&self) -> Option<NonNull<Waiter<T, P>>> {
        let head = self.head.get()?;
        // Safety: `head` is linked and therefore valid.
        let next = unsafe { head.as_ref().next.get() };
        self.head.set(next);
        if next.is_none() {
            self.tail.set(None);
        }
        self.len.set(self.len.get() - 1);
        Some(head)
    }

    /// Wakes the task at the head of the queue, if any, delivering
    /// `result`. Returns whether a waiter was woken.
    pub fn wake_one<S>(&self, sched: &S, result: WakeResult) -> bool
    where
        S: Scheduler<Task = T>,
    {
        match self.pop_front() {
            // Safety: popped nodes are unlinked exactly once and their
            // storage remains valid until the waiting call observes the
            // removal, which has not happened yet.
            Some(node) => {
                sched.unpark(unsafe { node.as_ref().task() }, result);
                true
            }
            None => false,
        }
    }

    /// Wakes every queued task, delivering `result` to each, in FIFO
    /// order. Returns the number woken.
    pub fn wake_all<S>(&self, sched: &S, result: WakeResult) -> usize
    where
        S: Scheduler<Task = T>,
    {
        let mut n = 0;
        while self.wake_one(sched, result) {
            n += 1;
        }
        n
    }

    /// Wakes every queued waiter whose predicate currently satisfies
    /// `pred`, removing each and delivering `result`, in FIFO order among
    /// those satisfied. Waiters that do not satisfy `pred` are left queued
    /// in their original relative order. Returns the number woken.
    pub fn wake_predicate<S>(
        &self,
        sched: &S,
        result: WakeResult,
        mut pred: impl FnMut(&P) -> bool,
    ) -> usize
    where
        S: Scheduler<Task = T>,
    {
        let mut woken = 0;
        let mut prev: Option<NonNull<Waiter<T, P>>> = None;
        let mut cur = self.head.get();
        while let Some(node) = cur {
            // Safety: see `remove`; nodes stay valid until unlinked.
            let next = unsafe { node.as_ref().next.get() };
            let satisfied = pred(unsafe { node.as_ref().predicate() });
            if satisfied {
                match prev {
                    Some(p) => unsafe { p.as_ref().next.set(next) },
                    None => self.head.set(next),
                }
                if self.tail.get() == Some(node) {
                    self.tail.set(prev);
                }
                self.len.set(self.len.get() - 1);
                sched.unpark(unsafe { node.as_ref().task() }, result);
                woken += 1;
            } else {
                prev = Some(node);
            }
            cur = next;
        }
        woken
    }
}

impl<T: Copy, P> Default for WaitQueue<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::pin;
    use std::cell::RefCell;

    struct RecordingScheduler {
        woken: RefCell<Vec<(u32, WakeResult)>>,
    }

    impl RecordingScheduler {
        fn new() -> Self {
            RecordingScheduler {
                woken: RefCell::new(Vec::new()),
            }
        }
    }

    impl Scheduler for RecordingScheduler {
        type Task = u32;

        fn current_task(&self) -> u32 {
            0
        }

        fn park(&self, _task: u32, _deadline_us: Option<u64>) -> WakeResult {
            unimplemented!("not exercised by these tests")
        }

        fn unpark(&self, task: u32, result: WakeResult) {
            self.woken.borrow_mut().push((task, result));
        }
    }

    #[test]
    fn fifo_order_preserved() {
        let q: WaitQueue<u32> = WaitQueue::new();
        let a = pin!(Waiter::new(1, ()));
        let b = pin!(Waiter::new(2, ()));
        let c = pin!(Waiter::new(3, ()));
        q.enqueue(a.as_ref());
        q.enqueue(b.as_ref());
        q.enqueue(c.as_ref());
        assert_eq!(q.len(), 3);

        let sched = RecordingScheduler::new();
        q.wake_all(&sched, WakeResult::Ready);
        assert_eq!(
            *sched.woken.borrow(),
            vec![(1, WakeResult::Ready), (2, WakeResult::Ready), (3, WakeResult::Ready)]
        );
        assert!(q.is_empty());
    }

    #[test]
    fn remove_by_identity_from_middle() {
        let q: WaitQueue<u32> = WaitQueue::new();
        let a = pin!(Waiter::new(1, ()));
        let b = pin!(Waiter::new(2, ()));
        let c = pin!(Waiter::new(3, ()));
        q.enqueue(a.as_ref());
        q.enqueue(b.as_ref());
        q.enqueue(c.as_ref());

        assert!(q.remove(b.as_ref()));
        assert_eq!(q.len(), 2);
        // Removing an already-removed waiter is a harmless no-op.
        assert!(!q.remove(b.as_ref()));

        let sched = RecordingScheduler::new();
        q.wake_all(&sched, WakeResult::Timeout);
        assert_eq!(
            *sched.woken.borrow(),
            vec![(1, WakeResult::Timeout), (3, WakeResult::Timeout)]
        );
    }

    #[test]
    fn wake_predicate_skips_unsatisfied_and_preserves_their_order() {
        let q: WaitQueue<u32, u32> = WaitQueue::new();
        let a = pin!(Waiter::new(1, 0b001));
        let b = pin!(Waiter::new(2, 0b010));
        let c = pin!(Waiter::new(3, 0b001));
        q.enqueue(a.as_ref());
        q.enqueue(b.as_ref());
        q.enqueue(c.as_ref());

        let sched = RecordingScheduler::new();
        let woken = q.wake_predicate(&sched, WakeResult::Ready, |mask| mask & 0b001 != 0);
        assert_eq!(woken, 2);
        assert_eq!(
            *sched.woken.borrow(),
            vec![(1, WakeResult::Ready), (3, WakeResult::Ready)]
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn wake_one_returns_false_on_empty_queue() {
        let q: WaitQueue<u32> = WaitQueue::new();
        let sched = RecordingScheduler::new();
        assert!(!q.wake_one(&sched, WakeResult::Ready));
    }
}
