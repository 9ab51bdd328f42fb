// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event flags: a 32-bit mask with ANY/ALL/MASK wait predicates.
//!
//! Three predicate forms, each evaluated against the flags currently set:
//!
//! - [`EventWaitMode::Any`]: satisfied once any requested bit is set.
//! - [`EventWaitMode::All`]: satisfied once every requested bit is set.
//! - [`EventWaitMode::Mask`]: satisfied according to the object's
//!   [`EventMaskMode`], either an exact match or a superset match against
//!   the requested mask.
//!
//! In auto-clear mode, a waiter that is satisfied has its matched bits
//! cleared as part of being woken (or as part of a successful non-blocking
//! wait); in manual-clear mode bits persist until [`EventFlags::clear`] is
//! called explicitly.

use core::pin::pin;

use magnolia_abi::{
    EventClearMode, EventFlagsInfo, EventMaskMode, EventWaitMode, Generation, Handle, ObjectType,
    Status, WakeResult,
};

use crate::object::ObjectMeta;
use crate::registry::Registry;
use crate::sched::{Clock, Scheduler};
use crate::waitq::{Waiter, WaitQueue};
use crate::waitset::{Listeners, ReadyCallback};

/// Returns the bits an `(wait_type, requested)` predicate matches against
/// `current`, or `None` if it is not satisfied.
fn matched_bits(
    wait_type: EventWaitMode,
    mask_mode: EventMaskMode,
    current: u32,
    requested: u32,
) -> Option<u32> {
    match wait_type {
        EventWaitMode::Any => {
            let matched = current & requested;
            (matched != 0).then_some(matched)
        }
        EventWaitMode::All => (current & requested == requested).then_some(requested),
        EventWaitMode::Mask => match mask_mode {
            EventMaskMode::Exact => (current == requested).then_some(requested),
            EventMaskMode::Superset => (current & requested == requested).then_some(requested),
        },
    }
}

type Predicate = (EventWaitMode, u32);

struct State<T> {
    meta: ObjectMeta,
    clear_mode: EventClearMode,
    mask_mode: EventMaskMode,
    mask: u32,
    waiters: WaitQueue<T, Predicate>,
    listeners: Listeners,
    sets: u32,
    waits: u32,
    timeouts: u32,
}

impl<T> State<T> {
    fn is_ready(&self) -> bool {
        self.mask != 0
    }

    /// Applies auto-clear to `consumed` if this object is in auto-clear
    /// mode; otherwise a no-op.
    fn apply_auto_clear(&mut self, consumed: u32) {
        if self.clear_mode == EventClearMode::AutoClear {
            self.mask &= !consumed;
        }
    }
}

/// A fixed-capacity table of up to `N` event-flags groups.
pub struct EventFlags<S: Scheduler, const N: usize> {
    registry: spin::Mutex<Registry<State<S::Task>, N>>,
}

impl<S: Scheduler, const N: usize> EventFlags<S, N> {
    /// An empty table.
    pub fn new() -> Self {
        EventFlags {
            registry: spin::Mutex::new(Registry::new(ObjectType::EventFlags)),
        }
    }

    /// Creates a new event-flags group with mask `0`.
    pub fn create(&self, clear_mode: EventClearMode, mask_mode: EventMaskMode) -> Result<Handle, Status> {
        let mut registry = self.registry.lock();
        let handle = registry.allocate(State {
            meta: ObjectMeta::new(Generation::FIRST),
            clear_mode,
            mask_mode,
            mask: 0,
            waiters: WaitQueue::new(),
            listeners: Listeners::new(),
            sets: 0,
            waits: 0,
            timeouts: 0,
        });
        if handle.is_err() {
            crate::trace::record(crate::trace::Event::RegistryExhausted(ObjectType::EventFlags));
        }
        handle
    }

    /// Destroys an event-flags group, waking every blocked waiter with
    /// [`Status::ObjectDestroyed`] and notifying listeners not-ready, then
    /// frees the handle.
    pub fn destroy(&self, sched: &S, handle: Handle) -> Result<(), Status> {
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if !state.meta.destroy() {
                return Err(Status::ObjectDestroyed);
            }
            state.mask = 0;
            state.waiters.wake_all(sched, WakeResult::ObjectDestroyed);
            let due = state.listeners.notify_destroyed();
            crate::trace::record(crate::trace::Event::Destroyed(ObjectType::EventFlags));
            registry.release(handle)?;
            due
        };
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// ORs `bits` into the mask, then wakes every waiter whose predicate is
    /// now satisfied, in FIFO order among those satisfied, applying each
    /// one's auto-clear effect before evaluating the next. A request of
    /// `bits == 0` is a no-op (including skipping the destroyed check, to
    /// match a plain readiness probe).
    pub fn set(&self, sched: &S, handle: Handle, bits: u32) -> Result<(), Status> {
        if bits == 0 {
            self.registry.lock().get(handle)?;
            return Ok(());
        }
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            state.mask |= bits;
            state.sets += 1;

            let mask_mode = state.mask_mode;
            let clear_mode = state.clear_mode;
            let mut current = state.mask;
            state.waiters.wake_predicate(sched, WakeResult::Ready, |pred| {
                let (wait_type, requested) = *pred;
                match matched_bits(wait_type, mask_mode, current, requested) {
                    Some(consumed) => {
                        if clear_mode == EventClearMode::AutoClear {
                            current &= !consumed;
                        }
                        true
                    }
                    None => false,
                }
            });
            state.mask = current;

            state.listeners.notify(state.is_ready())
        };
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// ANDs `bits` out of the mask. Never wakes waiters, but may toggle
    /// readiness to false and so may fire listeners.
    pub fn clear(&self, handle: Handle, bits: u32) -> Result<(), Status> {
        if bits == 0 {
            self.registry.lock().get(handle)?;
            return Ok(());
        }
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            state.mask &= !bits;
            state.listeners.notify(state.is_ready())
        };
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// Snapshots the current mask.
    pub fn read(&self, handle: Handle) -> Result<u32, Status> {
        let registry = self.registry.lock();
        let state = registry.get(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        Ok(state.mask)
    }

    /// Non-blocking wait: if the predicate is satisfied at call time,
    /// applies auto-clear semantics and returns `Ok`; otherwise returns
    /// [`Status::NotReady`] without side effects.
    pub fn try_wait(&self, handle: Handle, wait_type: EventWaitMode, mask: u32) -> Result<(), Status> {
        if mask == 0 {
            return Err(Status::InvalidArgument);
        }
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        match matched_bits(wait_type, state.mask_mode, state.mask, mask) {
            Some(consumed) => {
                state.apply_auto_clear(consumed);
                state.waits += 1;
                Ok(())
            }
            None => Err(Status::NotReady),
        }
    }

    /// Waits up to `timeout_us` microseconds (use [`magnolia_abi::FOREVER`]
    /// to block indefinitely, or [`magnolia_abi::NO_WAIT`] for the same
    /// behavior as [`EventFlags::try_wait`]) for the predicate and applies
    /// its auto-clear effect.
    pub fn wait(
        &self,
        sched: &S,
        clock: &impl Clock,
        handle: Handle,
        wait_type: EventWaitMode,
        mask: u32,
        timeout_us: u64,
    ) -> Result<(), Status> {
        if mask == 0 {
            return Err(Status::InvalidArgument);
        }
        let deadline_us = match timeout_us {
            magnolia_abi::FOREVER => None,
            us => Some(clock.now_us().saturating_add(us)),
        };

        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        if let Some(consumed) = matched_bits(wait_type, state.mask_mode, state.mask, mask) {
            state.apply_auto_clear(consumed);
            state.waits += 1;
            return Ok(());
        }
        if timeout_us == magnolia_abi::NO_WAIT {
            state.timeouts += 1;
            crate::trace::record(crate::trace::Event::Timeout(ObjectType::EventFlags));
            return Err(Status::Timeout);
        }

        let task = sched.current_task();
        let waiter = pin!(Waiter::new(task, (wait_type, mask)));
        state.meta.waiter_added();
        state.waiters.enqueue(waiter.as_ref());
        drop(registry);

        let wake = sched.park(task, deadline_us);

        let mut registry = self.registry.lock();
        if let Ok(state) = registry.get_mut(handle) {
            state.waiters.remove(waiter.as_ref());
            state.meta.waiter_removed();
            match wake {
                WakeResult::Ready => state.waits += 1,
                WakeResult::Timeout => {
                    state.timeouts += 1;
                    crate::trace::record(crate::trace::Event::Timeout(ObjectType::EventFlags));
                }
                _ => {}
            }
        }
        drop(registry);
        match wake {
            WakeResult::Ready => Ok(()),
            other => Err(other.into_status()),
        }
    }

    /// Attaches a waitset listener, invoked once immediately with the
    /// group's current readiness (`mask != 0`) and again every time that
    /// readiness changes, until [`EventFlags::waitset_unsubscribe`] or the
    /// object is destroyed.
    pub fn waitset_subscribe(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            let ready = state.is_ready();
            state.listeners.subscribe(callback, user_data, ready)?
        };
        due.invoke();
        Ok(())
    }

    /// Detaches a previously attached listener.
    pub fn waitset_unsubscribe(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        state.listeners.unsubscribe(callback, user_data)
    }

    /// A point-in-time diagnostic snapshot.
    pub fn info(&self, handle: Handle) -> Result<EventFlagsInfo, Status> {
        let registry = self.registry.lock();
        let state = registry.get(handle)?;
        Ok(EventFlagsInfo {
            common: state.meta.common_info(),
            mask: state.mask,
            clear_mode: state.clear_mode,
            mask_mode: state.mask_mode,
            ready: state.is_ready(),
            sets: state.sets,
            waits: state.waits,
            timeouts: state.timeouts,
        })
    }
}

impl<S: Scheduler, const N: usize> Default for EventFlags<S, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct StepScheduler {
        current: u32,
        parked: RefCell<VecDeque<WakeResult>>,
        woken: RefCell<Vec<(u32, WakeResult)>>,
    }

    impl StepScheduler {
        fn new(current: u32) -> Self {
            StepScheduler {
                current,
                parked: RefCell::new(VecDeque::new()),
                woken: RefCell::new(Vec::new()),
            }
        }
    }

    impl Scheduler for StepScheduler {
        type Task = u32;
        fn current_task(&self) -> u32 {
            self.current
        }
        fn park(&self, _task: u32, _deadline_us: Option<u64>) -> WakeResult {
            self.parked
                .borrow_mut()
                .pop_front()
                .unwrap_or(WakeResult::Shutdown)
        }
        fn unpark(&self, task: u32, result: WakeResult) {
            self.woken.borrow_mut().push((task, result));
        }
    }

    struct FakeClock;
    impl Clock for FakeClock {
        fn now_us(&self) -> u64 {
            0
        }
    }

    #[test]
    fn wait_no_wait_times_out_without_consuming() {
        let ef: EventFlags<StepScheduler, 2> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Exact).unwrap();
        let sched = StepScheduler::new(1);
        let clock = FakeClock;
        assert_eq!(
            ef.wait(&sched, &clock, h, EventWaitMode::Any, 0b1, magnolia_abi::NO_WAIT),
            Err(Status::Timeout)
        );
        assert_eq!(ef.info(h).unwrap().timeouts, 1);
    }

    #[test]
    fn wait_returns_immediately_when_already_satisfied() {
        let ef: EventFlags<StepScheduler, 2> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Exact).unwrap();
        let sched = StepScheduler::new(1);
        let clock = FakeClock;
        ef.set(&sched, h, 0b1).unwrap();
        ef.wait(&sched, &clock, h, EventWaitMode::Any, 0b1, magnolia_abi::FOREVER)
            .unwrap();
        assert_eq!(ef.read(h).unwrap(), 0);
    }

    #[test]
    fn any_mode_matches_overlapping_bit() {
        let ef: EventFlags<StepScheduler, 2> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Exact).unwrap();
        let sched = StepScheduler::new(1);
        ef.set(&sched, h, 0b0110).unwrap();
        ef.try_wait(h, EventWaitMode::Any, 0b0100).unwrap();
        assert_eq!(ef.read(h).unwrap(), 0b0010);
    }

    #[test]
    fn all_mode_requires_every_bit() {
        let ef: EventFlags<StepScheduler, 2> = EventFlags::new();
        let h = ef.create(EventClearMode::ManualClear, EventMaskMode::Exact).unwrap();
        let sched = StepScheduler::new(1);
        ef.set(&sched, h, 0b0100).unwrap();
        assert_eq!(
            ef.try_wait(h, EventWaitMode::All, 0b0110),
            Err(Status::NotReady)
        );
        ef.set(&sched, h, 0b0010).unwrap();
        ef.try_wait(h, EventWaitMode::All, 0b0110).unwrap();
        // Manual clear: bits remain set after a successful wait.
        assert_eq!(ef.read(h).unwrap(), 0b0110);
    }

    #[test]
    fn mask_mode_exact_requires_exact_equality() {
        let ef: EventFlags<StepScheduler, 2> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Exact).unwrap();
        let sched = StepScheduler::new(1);
        ef.set(&sched, h, 0b0111).unwrap();
        assert_eq!(
            ef.try_wait(h, EventWaitMode::Mask, 0b0110),
            Err(Status::NotReady)
        );
        ef.try_wait(h, EventWaitMode::Mask, 0b0111).unwrap();
        assert_eq!(ef.read(h).unwrap(), 0);
    }

    #[test]
    fn mask_mode_superset_allows_extra_bits() {
        let ef: EventFlags<StepScheduler, 2> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Superset).unwrap();
        let sched = StepScheduler::new(1);
        ef.set(&sched, h, 0b0111).unwrap();
        ef.try_wait(h, EventWaitMode::Mask, 0b0110).unwrap();
        assert_eq!(ef.read(h).unwrap(), 0b0001);
    }

    #[test]
    fn lighter_waiter_overtakes_heavier_one_blocked_earlier() {
        // Task 1 (enqueued first) wants ALL of 0b111 (heavy); task 2
        // (enqueued second) wants ANY of 0b001 (light). A set of 0b001
        // alone should wake only task 2, leaving task 1 still queued.
        let q: WaitQueue<u32, Predicate> = WaitQueue::new();
        let heavy = pin!(Waiter::new(1u32, (EventWaitMode::All, 0b111u32)));
        let light = pin!(Waiter::new(2u32, (EventWaitMode::Any, 0b001u32)));
        q.enqueue(heavy.as_ref());
        q.enqueue(light.as_ref());

        let sched = StepScheduler::new(0);
        let mut current: u32 = 0b001;
        let woken = q.wake_predicate(&sched, WakeResult::Ready, |pred| {
            let (wait_type, requested) = *pred;
            matched_bits(wait_type, EventMaskMode::Exact, current, requested)
                .map(|consumed| current &= !consumed)
                .is_some()
        });
        assert_eq!(woken, 1);
        assert_eq!(*sched.woken.borrow(), vec![(2, WakeResult::Ready)]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn set_applies_auto_clear_sequentially_to_each_satisfied_waiter() {
        // Two waiters both want ANY(0b01); auto-clear after the first is
        // woken must leave the bit cleared before the second is visited,
        // so only the first wakes even though both could have matched the
        // original mask.
        let q: WaitQueue<u32, Predicate> = WaitQueue::new();
        let first = pin!(Waiter::new(1u32, (EventWaitMode::Any, 0b01u32)));
        let second = pin!(Waiter::new(2u32, (EventWaitMode::Any, 0b01u32)));
        q.enqueue(first.as_ref());
        q.enqueue(second.as_ref());

        let sched = StepScheduler::new(0);
        let mut current: u32 = 0b01;
        q.wake_predicate(&sched, WakeResult::Ready, |pred| {
            let (wait_type, requested) = *pred;
            match matched_bits(wait_type, EventMaskMode::Exact, current, requested) {
                Some(consumed) => {
                    current &= !consumed;
                    true
                }
                None => false,
            }
        });
        assert_eq!(*sched.woken.borrow(), vec![(1, WakeResult::Ready)]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn destroy_wakes_waiters_and_notifies_listeners_not_ready() {
        let ef: EventFlags<StepScheduler, 1> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Exact).unwrap();
        let sched = StepScheduler::new(3);

        static mut LAST: Option<bool> = None;
        fn cb(ready: bool, _ud: *mut core::ffi::c_void) {
            unsafe { LAST = Some(ready) };
        }
        ef.waitset_subscribe(h, cb, core::ptr::null_mut()).unwrap();
        unsafe { assert_eq!(LAST, Some(false)) };

        ef.set(&sched, h, 0b1).unwrap();
        unsafe { assert_eq!(LAST, Some(true)) };

        ef.destroy(&sched, h).unwrap();
        unsafe { assert_eq!(LAST, Some(false)) };
        assert_eq!(ef.read(h), Err(Status::ObjectDestroyed));
    }

    #[test]
    fn zero_mask_is_invalid_argument() {
        let ef: EventFlags<StepScheduler, 1> = EventFlags::new();
        let h = ef.create(EventClearMode::AutoClear, EventMaskMode::Exact).unwrap();
        assert_eq!(
            ef.try_wait(h, EventWaitMode::Any, 0),
            Err(Status::InvalidArgument)
        );
    }
}
