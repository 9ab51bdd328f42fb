// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Signals: a one-shot or counting wake primitive.
//!
//! In [`SignalMode::OneShot`] mode a signal latches a single pending
//! event; setting it while already pending is a no-op, and a successful
//! wait clears it. In [`SignalMode::Counting`] mode a signal accumulates a
//! non-negative count; every set increments it and every successful wait
//! decrements it, so `n` sets followed by `n` waits never lose an event to
//! coalescing.

use core::pin::pin;

use magnolia_abi::{Generation, Handle, ObjectType, SignalInfo, SignalMode, Status, WakeResult};

use crate::object::ObjectMeta;
use crate::registry::Registry;
use crate::sched::{Clock, Scheduler};
use crate::waitq::{Waiter, WaitQueue};
use crate::waitset::{Listeners, ReadyCallback};

struct State<T> {
    meta: ObjectMeta,
    mode: SignalMode,
    pending: bool,
    counter: u32,
    waiters: WaitQueue<T>,
    listeners: Listeners,
    sets: u32,
    waits: u32,
    timeouts: u32,
}

impl<T> State<T> {
    fn is_ready(&self) -> bool {
        match self.mode {
            SignalMode::OneShot => self.pending,
            SignalMode::Counting => self.counter > 0,
        }
    }

    fn try_consume(&mut self) -> bool {
        match self.mode {
            SignalMode::OneShot => {
                if self.pending {
                    self.pending = false;
                    true
                } else {
                    false
                }
            }
            SignalMode::Counting => {
                if self.counter > 0 {
                    self.counter -= 1;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// A fixed-capacity table of up to `N` signals.
pub struct Signals<S: Scheduler, const N: usize> {
    registry: spin::Mutex<Registry<State<S::Task>, N>>,
}

impl<S: Scheduler, const N: usize> Signals<S, N> {
    /// An empty table.
    pub fn new() -> Self {
        Signals {
            registry: spin::Mutex::new(Registry::new(ObjectType::Signal)),
        }
    }

    /// Creates a new signal in `mode`, initially not pending / at count 0.
    pub fn create(&self, mode: SignalMode) -> Result<Handle, Status> {
        let mut registry = self.registry.lock();
        let handle = registry.allocate(State {
            meta: ObjectMeta::new(Generation::FIRST),
            mode,
            pending: false,
            counter: 0,
            waiters: WaitQueue::new(),
            listeners: Listeners::new(),
            sets: 0,
            waits: 0,
            timeouts: 0,
        });
        if handle.is_err() {
            crate::trace::record(crate::trace::Event::RegistryExhausted(ObjectType::Signal));
        }
        handle
    }

    /// Destroys a signal, waking every blocked waiter with
    /// [`Status::ObjectDestroyed`] and notifying every attached listener
    /// not-ready, then frees the handle.
    pub fn destroy(&self, sched: &S, handle: Handle) -> Result<(), Status> {
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if !state.meta.destroy() {
                return Err(Status::ObjectDestroyed);
            }
            state.waiters.wake_all(sched, WakeResult::ObjectDestroyed);
            let due = state.listeners.notify_destroyed();
            crate::trace::record(crate::trace::Event::Destroyed(ObjectType::Signal));
            registry.release(handle)?;
            due
        };
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// Sets the signal. In one-shot mode, a no-op if already pending;
    /// otherwise wakes one waiter (or latches the pending flag if none is
    /// blocked). In counting mode, increments the counter and wakes one
    /// waiter.
    pub fn set(&self, sched: &S, handle: Handle) -> Result<(), Status> {
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            state.sets += 1;
            match state.mode {
                SignalMode::OneShot => {
                    if !state.pending {
                        if !state.waiters.wake_one(sched, WakeResult::Ready) {
                            state.pending = true;
                        }
                    }
                }
                SignalMode::Counting => {
                    state.counter += 1;
                    state.waiters.wake_one(sched, WakeResult::Ready);
                }
            }
            state.listeners.notify(state.is_ready())
        };
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// Non-blocking wait: consumes a pending event if one is available,
    /// otherwise returns [`Status::NotReady`] immediately.
    pub fn try_wait(&self, handle: Handle) -> Result<(), Status> {
        let due = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            if !state.try_consume() {
                return Err(Status::NotReady);
            }
            state.waits += 1;
            state.listeners.notify(state.is_ready())
        };
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// Waits up to `timeout_us` microseconds (use [`magnolia_abi::FOREVER`]
    /// to block indefinitely, or [`magnolia_abi::NO_WAIT`] for the same
    /// behavior as [`Signals::try_wait`]) for the signal and consumes it.
    pub fn wait(
        &self,
        sched: &S,
        clock: &impl Clock,
        handle: Handle,
        timeout_us: u64,
    ) -> Result<(), Status> {
        let deadline_us = match timeout_us {
            magnolia_abi::FOREVER => None,
            us => Some(clock.now_us().saturating_add(us)),
        };

        loop {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            if state.try_consume() {
                state.waits += 1;
                let due = state.listeners.notify(state.is_ready());
                drop(registry);
                for d in due {
                    d.invoke();
                }
                return Ok(());
            }
            if timeout_us == magnolia_abi::NO_WAIT {
                state.timeouts += 1;
                crate::trace::record(crate::trace::Event::Timeout(ObjectType::Signal));
                return Err(Status::Timeout);
            }

            let task = sched.current_task();
            let waiter = pin!(Waiter::new(task, ()));
            state.meta.waiter_added();
            state.waiters.enqueue(waiter.as_ref());
            drop(registry);

            let wake = sched.park(task, deadline_us);

            let mut registry = self.registry.lock();
            if let Ok(state) = registry.get_mut(handle) {
                state.waiters.remove(waiter.as_ref());
                state.meta.waiter_removed();
                if wake == WakeResult::Timeout {
                    state.timeouts += 1;
                    crate::trace::record(crate::trace::Event::Timeout(ObjectType::Signal));
                }
            }
            drop(registry);
            match wake {
                WakeResult::Ready => continue,
                other => return Err(other.into_status()),
            }
        }
    }

    /// Attaches a waitset listener, which is invoked once immediately with
    /// the signal's current readiness and again every time that readiness
    /// changes, until [`Signals::waitset_unsubscribe`] or the signal is
    /// destroyed.
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
    pub fn info(&self, handle: Handle) -> Result<SignalInfo, Status> {
        let registry = self.registry.lock();
        let state = registry.get(handle)?;
        Ok(SignalInfo {
            common: state.meta.common_info(),
            mode: state.mode,
            ready: state.is_ready(),
            count: state.counter,
            sets: state.sets,
            waits: state.waits,
            timeouts: state.timeouts,
        })
    }
}

impl<S: Scheduler, const N: usize> Default for Signals<S, N> {
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
    fn one_shot_set_latches_when_nobody_waiting() {
        let s: Signals<StepScheduler, 2> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(1);
        s.set(&sched, h).unwrap();
        assert_eq!(s.info(h).unwrap().ready, true);
        s.try_wait(h).unwrap();
        assert_eq!(s.try_wait(h), Err(Status::NotReady));
    }

    #[test]
    fn one_shot_second_set_while_pending_is_a_no_op() {
        let s: Signals<StepScheduler, 2> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(1);
        s.set(&sched, h).unwrap();
        s.set(&sched, h).unwrap();
        s.try_wait(h).unwrap();
        assert_eq!(s.try_wait(h), Err(Status::NotReady));
    }

    #[test]
    fn counting_mode_accumulates_across_sets() {
        let s: Signals<StepScheduler, 2> = Signals::new();
        let h = s.create(SignalMode::Counting).unwrap();
        let sched = StepScheduler::new(1);
        s.set(&sched, h).unwrap();
        s.set(&sched, h).unwrap();
        s.set(&sched, h).unwrap();
        assert_eq!(s.info(h).unwrap().count, 3);
        s.try_wait(h).unwrap();
        s.try_wait(h).unwrap();
        s.try_wait(h).unwrap();
        assert_eq!(s.try_wait(h), Err(Status::NotReady));
    }

    #[test]
    fn try_wait_on_unset_signal_is_not_ready() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        assert_eq!(s.try_wait(h), Err(Status::NotReady));
    }

    #[test]
    fn wait_no_wait_times_out_without_consuming() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(1);
        let clock = FakeClock;
        assert_eq!(
            s.wait(&sched, &clock, h, magnolia_abi::NO_WAIT),
            Err(Status::Timeout)
        );
        let info = s.info(h).unwrap();
        assert_eq!(info.timeouts, 1);
        assert_eq!(info.waits, 0);
    }

    #[test]
    fn wait_returns_immediately_when_already_pending() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(1);
        let clock = FakeClock;
        s.set(&sched, h).unwrap();
        s.wait(&sched, &clock, h, magnolia_abi::FOREVER).unwrap();
        assert_eq!(s.info(h).unwrap().ready, false);
    }

    #[test]
    fn blocked_waiter_is_woken_by_set() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(7);
        sched.parked.borrow_mut().push_back(WakeResult::Ready);
        let clock = FakeClock;
        s.wait(&sched, &clock, h, magnolia_abi::FOREVER).unwrap();
        assert_eq!(s.info(h).unwrap().waits, 1);
    }

    #[test]
    fn destroy_wakes_waiters_and_notifies_listeners_not_ready() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(3);

        static mut LAST: Option<bool> = None;
        fn cb(ready: bool, _ud: *mut core::ffi::c_void) {
            unsafe { LAST = Some(ready) };
        }
        s.waitset_subscribe(h, cb, core::ptr::null_mut()).unwrap();
        unsafe { assert_eq!(LAST, Some(false)) };

        s.set(&sched, h).unwrap();
        unsafe { assert_eq!(LAST, Some(true)) };

        s.destroy(&sched, h).unwrap();
        unsafe { assert_eq!(LAST, Some(false)) };
        assert_eq!(s.info(h), Err(Status::ObjectDestroyed));
    }

    #[test]
    fn destroy_is_idempotent_returns_object_destroyed_on_second_call() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        let sched = StepScheduler::new(1);
        s.destroy(&sched, h).unwrap();
        assert_eq!(s.destroy(&sched, h), Err(Status::ObjectDestroyed));
    }

    #[test]
    fn waitset_unsubscribe_unknown_listener_is_invalid_argument() {
        let s: Signals<StepScheduler, 1> = Signals::new();
        let h = s.create(SignalMode::OneShot).unwrap();
        fn cb(_ready: bool, _ud: *mut core::ffi::c_void) {}
        assert_eq!(
            s.waitset_unsubscribe(h, cb, core::ptr::null_mut()),
            Err(Status::InvalidArgument)
        );
    }
}
