// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded FIFO channels of variable-length messages.
//!
//! A channel is created with a runtime `capacity` (how many messages it can
//! hold) and `message_size` (the largest single message it will accept, in
//! bytes); every enqueued message may be anywhere from 1 up to
//! `message_size` bytes and is preserved verbatim on dequeue, including its
//! exact length. Sends block while the channel is full and receives block
//! while it is empty, each against its own FIFO wait queue so that senders
//! and receivers never contend on the same queue.
//!
//! Storage is a fixed-shape table sized to [`MAX_CHANNEL_CAPACITY`] slots of
//! [`MAX_CHANNEL_MESSAGE_SIZE`] bytes each; `create` rejects any
//! `(capacity, message_size)` pair that would not fit, so every channel in a
//! given [`Channels`] table shares one handle family regardless of its own
//! shape.
//!
//! Readiness for the waitset mechanism is two independent conditions here,
//! not one: "has at least one message" and "has room for one more". Callers
//! subscribe to whichever (or both) they care about.

use core::pin::pin;

use magnolia_abi::{ChannelInfo, Generation, Handle, ObjectType, Status, WakeResult};

use crate::object::ObjectMeta;
use crate::registry::Registry;
use crate::sched::{Clock, Scheduler};
use crate::waitq::{Waiter, WaitQueue};
use crate::waitset::{Listeners, ReadyCallback};

/// Upper bound on a single channel's message slot count.
pub const MAX_CHANNEL_CAPACITY: usize = 16;

/// Upper bound on a single channel's message size, in bytes.
pub const MAX_CHANNEL_MESSAGE_SIZE: usize = 64;

struct State<T> {
    meta: ObjectMeta,
    capacity: usize,
    message_size: usize,
    slots: [[u8; MAX_CHANNEL_MESSAGE_SIZE]; MAX_CHANNEL_CAPACITY],
    lengths: [usize; MAX_CHANNEL_CAPACITY],
    head: usize,
    depth: usize,
    send_waiters: WaitQueue<T>,
    recv_waiters: WaitQueue<T>,
    readable_listeners: Listeners,
    writable_listeners: Listeners,
}

impl<T> State<T> {
    fn is_readable(&self) -> bool {
        self.depth > 0
    }

    fn is_writable(&self) -> bool {
        self.depth < self.capacity
    }

    /// Length of the message at the head of the queue. Only valid while
    /// [`State::is_readable`].
    fn peek_len(&self) -> usize {
        self.lengths[self.head]
    }

    fn push(&mut self, message: &[u8]) {
        let tail = (self.head + self.depth) % self.capacity;
        self.slots[tail][..message.len()].copy_from_slice(message);
        self.lengths[tail] = message.len();
        self.depth += 1;
    }

    /// Copies the head message into `out` and advances the queue, returning
    /// the message's length. Caller must have checked `out.len()` against
    /// [`State::peek_len`] first.
    fn pop(&mut self, out: &mut [u8]) -> usize {
        let len = self.lengths[self.head];
        out[..len].copy_from_slice(&self.slots[self.head][..len]);
        self.head = (self.head + 1) % self.capacity;
        self.depth -= 1;
        len
    }
}

/// A fixed-capacity table of up to `N` channels, each with its own runtime
/// capacity and message size bounded by [`MAX_CHANNEL_CAPACITY`] and
/// [`MAX_CHANNEL_MESSAGE_SIZE`].
pub struct Channels<S: Scheduler, const N: usize> {
    registry: spin::Mutex<Registry<State<S::Task>, N>>,
}

impl<S: Scheduler, const N: usize> Channels<S, N> {
    /// An empty table.
    pub fn new() -> Self {
        Channels {
            registry: spin::Mutex::new(Registry::new(ObjectType::Channel)),
        }
    }

    /// Creates a new, empty channel able to hold `capacity` messages of up
    /// to `message_size` bytes each. Fails with [`Status::InvalidArgument`]
    /// if either bound is zero or exceeds the table's fixed storage shape.
    pub fn create(&self, capacity: usize, message_size: usize) -> Result<Handle, Status> {
        if capacity == 0
            || capacity > MAX_CHANNEL_CAPACITY
            || message_size == 0
            || message_size > MAX_CHANNEL_MESSAGE_SIZE
        {
            return Err(Status::InvalidArgument);
        }
        let mut registry = self.registry.lock();
        let handle = registry.allocate(State {
            meta: ObjectMeta::new(Generation::FIRST),
            capacity,
            message_size,
            slots: [[0u8; MAX_CHANNEL_MESSAGE_SIZE]; MAX_CHANNEL_CAPACITY],
            lengths: [0usize; MAX_CHANNEL_CAPACITY],
            head: 0,
            depth: 0,
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
            readable_listeners: Listeners::new(),
            writable_listeners: Listeners::new(),
        });
        if handle.is_err() {
            crate::trace::record(crate::trace::Event::RegistryExhausted(ObjectType::Channel));
        }
        handle
    }

    /// Destroys the channel, waking every blocked sender and receiver with
    /// [`Status::ObjectDestroyed`] and notifying every listener not-ready.
    pub fn destroy(&self, sched: &S, handle: Handle) -> Result<(), Status> {
        let mut due = heapless::Vec::<_, 8>::new();
        {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if !state.meta.destroy() {
                return Err(Status::ObjectDestroyed);
            }
            state.send_waiters.wake_all(sched, WakeResult::ObjectDestroyed);
            state.recv_waiters.wake_all(sched, WakeResult::ObjectDestroyed);
            for d in state.readable_listeners.notify_destroyed() {
                let _ = due.push(d);
            }
            for d in state.writable_listeners.notify_destroyed() {
                let _ = due.push(d);
            }
            crate::trace::record(crate::trace::Event::Destroyed(ObjectType::Channel));
            registry.release(handle)?;
        }
        for d in due {
            d.invoke();
        }
        Ok(())
    }

    /// Non-blocking send: fails with [`Status::Full`] rather than blocking.
    /// `message` must be 1..=`message_size` bytes.
    pub fn try_send(&self, sched: &S, handle: Handle, message: &[u8]) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if message.is_empty() || message.len() > state.message_size {
            return Err(Status::InvalidArgument);
        }
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        if !state.is_writable() {
            return Err(Status::Full);
        }
        state.push(message);
        state.recv_waiters.wake_one(sched, WakeResult::Ready);
        let readable_due = state.readable_listeners.notify(state.is_readable());
        let writable_due = state.writable_listeners.notify(state.is_writable());
        drop(registry);
        for d in readable_due.into_iter().chain(writable_due) {
            d.invoke();
        }
        Ok(())
    }

    /// Sends `message` (1..=`message_size` bytes), blocking indefinitely
    /// while the channel is full.
    pub fn send(
        &self,
        sched: &S,
        clock: &impl Clock,
        handle: Handle,
        message: &[u8],
    ) -> Result<(), Status> {
        self.send_timed(sched, clock, handle, message, magnolia_abi::FOREVER)
    }

    /// Like [`Channels::send`], with an explicit timeout.
    pub fn send_timed(
        &self,
        sched: &S,
        clock: &impl Clock,
        handle: Handle,
        message: &[u8],
        timeout_us: u64,
    ) -> Result<(), Status> {
        let deadline_us = match timeout_us {
            magnolia_abi::FOREVER => None,
            us => Some(clock.now_us().saturating_add(us)),
        };

        loop {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if message.is_empty() || message.len() > state.message_size {
                return Err(Status::InvalidArgument);
            }
            if state.meta.is_destroyed() {
                return Err(Status::ObjectDestroyed);
            }
            if state.is_writable() {
                state.push(message);
                state.recv_waiters.wake_one(sched, WakeResult::Ready);
                let readable_due = state.readable_listeners.notify(state.is_readable());
                let writable_due = state.writable_listeners.notify(state.is_writable());
                drop(registry);
                for d in readable_due.into_iter().chain(writable_due) {
                    d.invoke();
                }
                return Ok(());
            }
            if timeout_us == magnolia_abi::NO_WAIT {
                return Err(Status::Timeout);
            }

            let task = sched.current_task();
            let waiter = pin!(Waiter::new(task, ()));
            state.meta.waiter_added();
            state.send_waiters.enqueue(waiter.as_ref());
            drop(registry);

            let wake = sched.park(task, deadline_us);

            let mut registry = self.registry.lock();
            if let Ok(state) = registry.get_mut(handle) {
                state.send_waiters.remove(waiter.as_ref());
                state.meta.waiter_removed();
                if wake == WakeResult::Timeout {
                    crate::trace::record(crate::trace::Event::Timeout(ObjectType::Channel));
                }
            }
            drop(registry);
            match wake {
                WakeResult::Ready => continue,
                other => return Err(other.into_status()),
            }
        }
    }

    /// Non-blocking receive: fails with [`Status::Empty`] rather than
    /// blocking, or with [`Status::InvalidArgument`] if `out` is shorter
    /// than the queued message (which is left queued, not discarded).
    /// Returns the message's length on success.
    pub fn try_recv(&self, sched: &S, handle: Handle, out: &mut [u8]) -> Result<usize, Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        if !state.is_readable() {
            return Err(Status::Empty);
        }
        if out.len() < state.peek_len() {
            return Err(Status::InvalidArgument);
        }
        let len = state.pop(out);
        state.send_waiters.wake_one(sched, WakeResult::Ready);
        let readable_due = state.readable_listeners.notify(state.is_readable());
        let writable_due = state.writable_listeners.notify(state.is_writable());
        drop(registry);
        for d in readable_due.into_iter().chain(writable_due) {
            d.invoke();
        }
        Ok(len)
    }

    /// Receives one message, blocking indefinitely while the channel is
    /// empty. Returns the message's length.
    pub fn recv(
        &self,
        sched: &S,
        clock: &impl Clock,
        handle: Handle,
        out: &mut [u8],
    ) -> Result<usize, Status> {
        self.recv_timed(sched, clock, handle, out, magnolia_abi::FOREVER)
    }

    /// Like [`Channels::recv`], with an explicit timeout.
    pub fn recv_timed(
        &self,
        sched: &S,
        clock: &impl Clock,
        handle: Handle,
        out: &mut [u8],
        timeout_us: u64,
    ) -> Result<usize, Status> {
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
            if state.is_readable() {
                if out.len() < state.peek_len() {
                    return Err(Status::InvalidArgument);
                }
                let len = state.pop(out);
                state.send_waiters.wake_one(sched, WakeResult::Ready);
                let readable_due = state.readable_listeners.notify(state.is_readable());
                let writable_due = state.writable_listeners.notify(state.is_writable());
                drop(registry);
                for d in readable_due.into_iter().chain(writable_due) {
                    d.invoke();
                }
                return Ok(len);
            }
            if timeout_us == magnolia_abi::NO_WAIT {
                return Err(Status::Timeout);
            }

            let task = sched.current_task();
            let waiter = pin!(Waiter::new(task, ()));
            state.meta.waiter_added();
            state.recv_waiters.enqueue(waiter.as_ref());
            drop(registry);

            let wake = sched.park(task, deadline_us);

            let mut registry = self.registry.lock();
            if let Ok(state) = registry.get_mut(handle) {
                state.recv_waiters.remove(waiter.as_ref());
                state.meta.waiter_removed();
                if wake == WakeResult::Timeout {
                    crate::trace::record(crate::trace::Event::Timeout(ObjectType::Channel));
                }
            }
            drop(registry);
            match wake {
                WakeResult::Ready => continue,
                other => return Err(other.into_status()),
            }
        }
    }

    /// Attaches a listener for "has a message available".
    pub fn waitset_subscribe_readable(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        let ready = state.is_readable();
        let due = state.readable_listeners.subscribe(callback, user_data, ready)?;
        drop(registry);
        due.invoke();
        Ok(())
    }

    /// Attaches a listener for "has room for another message".
    pub fn waitset_subscribe_writable(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        let ready = state.is_writable();
        let due = state.writable_listeners.subscribe(callback, user_data, ready)?;
        drop(registry);
        due.invoke();
        Ok(())
    }

    /// Detaches a readable-state listener.
    pub fn waitset_unsubscribe_readable(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        registry.get_mut(handle)?.readable_listeners.unsubscribe(callback, user_data)
    }

    /// Detaches a writable-state listener.
    pub fn waitset_unsubscribe_writable(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        registry.get_mut(handle)?.writable_listeners.unsubscribe(callback, user_data)
    }

    /// A point-in-time diagnostic snapshot.
    pub fn info(&self, handle: Handle) -> Result<ChannelInfo, Status> {
        let registry = self.registry.lock();
        let state = registry.get(handle)?;
        Ok(ChannelInfo {
            common: state.meta.common_info(),
            capacity: state.capacity as u32,
            depth: state.depth as u32,
            message_size: state.message_size as u32,
            waiting_senders: state.send_waiters.len() as u32,
            waiting_receivers: state.recv_waiters.len() as u32,
        })
    }
}

impl<S: Scheduler, const N: usize> Default for Channels<S, N> {
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
    fn create_rejects_out_of_bounds_shape() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        assert_eq!(c.create(0, 8), Err(Status::InvalidArgument));
        assert_eq!(c.create(4, 0), Err(Status::InvalidArgument));
        assert_eq!(c.create(MAX_CHANNEL_CAPACITY + 1, 8), Err(Status::InvalidArgument));
        assert_eq!(c.create(4, MAX_CHANNEL_MESSAGE_SIZE + 1), Err(Status::InvalidArgument));
    }

    #[test]
    fn send_recv_roundtrip_preserves_variable_length() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(2, 8).unwrap();
        let sched = StepScheduler::new(1);
        c.try_send(&sched, h, b"hi").unwrap();
        let mut out = [0u8; 8];
        let len = c.try_recv(&sched, h, &mut out).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&out[..len], b"hi");
    }

    #[test]
    fn oversized_message_is_invalid_argument() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(2, 4).unwrap();
        let sched = StepScheduler::new(1);
        assert_eq!(c.try_send(&sched, h, b"toolong"), Err(Status::InvalidArgument));
    }

    #[test]
    fn empty_message_is_invalid_argument() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(2, 4).unwrap();
        let sched = StepScheduler::new(1);
        assert_eq!(c.try_send(&sched, h, b""), Err(Status::InvalidArgument));
    }

    #[test]
    fn try_send_on_full_channel_returns_full() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(1, 4).unwrap();
        let sched = StepScheduler::new(1);
        c.try_send(&sched, h, b"a").unwrap();
        assert_eq!(c.try_send(&sched, h, b"b"), Err(Status::Full));
    }

    #[test]
    fn try_recv_on_empty_channel_returns_empty() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(1, 4).unwrap();
        let sched = StepScheduler::new(1);
        let mut out = [0u8; 4];
        assert_eq!(c.try_recv(&sched, h, &mut out), Err(Status::Empty));
    }

    #[test]
    fn short_buffer_rejects_recv_and_leaves_message_queued() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(2, 8).unwrap();
        let sched = StepScheduler::new(1);
        c.try_send(&sched, h, b"hello").unwrap();
        let mut out = [0u8; 2];
        assert_eq!(c.try_recv(&sched, h, &mut out), Err(Status::InvalidArgument));
        assert_eq!(c.info(h).unwrap().depth, 1);
        let mut out = [0u8; 8];
        let len = c.try_recv(&sched, h, &mut out).unwrap();
        assert_eq!(&out[..len], b"hello");
    }

    #[test]
    fn fifo_order_preserved_across_sends_and_receives() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(4, 4).unwrap();
        let sched = StepScheduler::new(1);
        c.try_send(&sched, h, b"one").unwrap();
        c.try_send(&sched, h, b"two").unwrap();
        let mut out = [0u8; 4];
        let len = c.try_recv(&sched, h, &mut out).unwrap();
        assert_eq!(&out[..len], b"one");
        let len = c.try_recv(&sched, h, &mut out).unwrap();
        assert_eq!(&out[..len], b"two");
    }

    #[test]
    fn wait_no_wait_times_out_on_empty_channel() {
        let c: Channels<StepScheduler, 4> = Channels::new();
        let h = c.create(1, 4).unwrap();
        let sched = StepScheduler::new(1);
        let clock = FakeClock;
        let mut out = [0u8; 4];
        assert_eq!(
            c.recv_timed(&sched, &clock, h, &mut out, magnolia_abi::NO_WAIT),
            Err(Status::Timeout)
        );
    }

    #[test]
    fn destroy_wakes_waiters_and_notifies_listeners_not_ready() {
        let c: Channels<StepScheduler, 1> = Channels::new();
        let h = c.create(1, 4).unwrap();
        let sched = StepScheduler::new(3);

        static mut LAST_READABLE: Option<bool> = None;
        fn cb(ready: bool, _ud: *mut core::ffi::c_void) {
            unsafe { LAST_READABLE = Some(ready) };
        }
        c.waitset_subscribe_readable(h, cb, core::ptr::null_mut()).unwrap();
        unsafe { assert_eq!(LAST_READABLE, Some(false)) };

        c.try_send(&sched, h, b"x").unwrap();
        unsafe { assert_eq!(LAST_READABLE, Some(true)) };

        c.destroy(&sched, h).unwrap();
        unsafe { assert_eq!(LAST_READABLE, Some(false)) };
        assert_eq!(c.info(h), Err(Status::ObjectDestroyed));
    }

    #[test]
    fn writable_listener_fires_on_full_and_drain() {
        let c: Channels<StepScheduler, 1> = Channels::new();
        let h = c.create(1, 4).unwrap();
        let sched = StepScheduler::new(3);

        static mut LAST_WRITABLE: Option<bool> = None;
        fn cb(ready: bool, _ud: *mut core::ffi::c_void) {
            unsafe { LAST_WRITABLE = Some(ready) };
        }
        c.waitset_subscribe_writable(h, cb, core::ptr::null_mut()).unwrap();
        unsafe { assert_eq!(LAST_WRITABLE, Some(true)) };

        c.try_send(&sched, h, b"x").unwrap();
        unsafe { assert_eq!(LAST_WRITABLE, Some(false)) };

        let mut out = [0u8; 4];
        c.try_recv(&sched, h, &mut out).unwrap();
        unsafe { assert_eq!(LAST_WRITABLE, Some(true)) };
    }
}
