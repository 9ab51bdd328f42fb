// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared-memory regions: raw byte buffers, ring buffers, and framed packet
//! buffers, all backed by a single heap allocation owned by the region.
//!
//! Raw mode never blocks and keeps its cursor on the attachment; ring and
//! packet mode share a region-wide head/tail/used-bytes cursor and block
//! through the same read/write wait queues every other family uses. A
//! region's buffer is freed only once it has been destroyed *and* its last
//! attachment has detached, whichever happens last.

use core::ptr::NonNull;

use magnolia_abi::{
    AccessMode, Generation, Handle, ObjectType, RingOverwritePolicy, ShmAttachmentOptions,
    ShmControlCommand, ShmInfo, ShmMode, ShmRegionOptions, Status, WakeResult,
    SHM_PACKET_HEADER_SIZE,
};

use crate::object::ObjectMeta;
use crate::registry::Registry;
use crate::sched::{Clock, Scheduler, ShmAllocator};
use crate::waitq::{Waiter, WaitQueue};
use crate::waitset::{Listeners, ReadyCallback};
use core::pin::pin;

/// A live attachment to a shared-memory region.
///
/// Returned by [`Shms::attach`] and consumed by every subsequent
/// [`Shms`] read/write/control/detach call on that attachment. Carries its
/// own cursor for raw-mode regions; ignored for ring and packet modes, which
/// track their cursor on the region itself.
///
/// Once [`Shms::detach`] succeeds, the descriptor it was called with is
/// marked no longer attached; every other operation on that same descriptor
/// afterward fails with [`Status::NotAttached`] rather than silently
/// no-oping or re-detaching.
#[derive(Clone, Copy, Debug)]
pub struct Attachment {
    handle: Handle,
    mode: AccessMode,
    cursor: usize,
    attached: bool,
}

impl Attachment {
    /// The region this attachment refers to.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// The access rights this attachment was created with.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// The attachment's current raw-mode byte cursor.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether [`Shms::detach`] has not yet been called on this descriptor.
    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

struct State<T> {
    meta: ObjectMeta,
    mode: ShmMode,
    buffer: NonNull<u8>,
    region_size: usize,
    ring_policy: RingOverwritePolicy,
    head: usize,
    tail: usize,
    used: usize,
    packet_count: usize,
    packet_max_payload: usize,
    attachment_count: u32,
    read_waiters: WaitQueue<T>,
    write_waiters: WaitQueue<T>,
    readable_listeners: Listeners,
    writable_listeners: Listeners,
    reads: u32,
    writes: u32,
    read_timeouts: u32,
    write_timeouts: u32,
    ring_overflows: u32,
    packet_drops: u32,
    attachments: u32,
}

// Safety: `buffer` is a heap allocation owned exclusively by this `State`
// and only ever touched while the owning region's registry lock is held;
// it carries no thread affinity of its own.
unsafe impl<T: Send> Send for State<T> {}

impl<T> State<T> {
    fn ring_capacity(&self) -> usize {
        self.region_size.saturating_sub(1)
    }

    fn ring_free_space(&self) -> usize {
        self.ring_capacity().saturating_sub(self.used)
    }

    fn packet_free_space(&self) -> usize {
        self.region_size.saturating_sub(self.used)
    }

    fn is_readable(&self) -> bool {
        match self.mode {
            ShmMode::Raw => true,
            ShmMode::Ring => self.used > 0,
            ShmMode::Packet => self.packet_count > 0,
        }
    }

    fn is_writable(&self) -> bool {
        match self.mode {
            ShmMode::Raw => true,
            ShmMode::Ring => match self.ring_policy {
                RingOverwritePolicy::BlockWriter => self.ring_free_space() > 0,
                RingOverwritePolicy::DropOldest => true,
            },
            ShmMode::Packet => self.packet_free_space() > SHM_PACKET_HEADER_SIZE,
        }
    }

    /// Copies `length` bytes from `src` into the ring-style buffer starting
    /// at byte offset `offset`, wrapping at `region_size`.
    fn copy_in(&mut self, offset: usize, src: &[u8]) {
        let len = src.len();
        if len == 0 {
            return;
        }
        let normalized = offset % self.region_size;
        let headspace = self.region_size - normalized;
        // Safety: `buffer` spans `region_size` bytes and every offset
        // written here is reduced modulo that size first.
        unsafe {
            let base = self.buffer.as_ptr();
            if headspace >= len {
                core::ptr::copy_nonoverlapping(src.as_ptr(), base.add(normalized), len);
            } else {
                core::ptr::copy_nonoverlapping(src.as_ptr(), base.add(normalized), headspace);
                core::ptr::copy_nonoverlapping(
                    src.as_ptr().add(headspace),
                    base,
                    len - headspace,
                );
            }
        }
    }

    fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        let len = dst.len();
        if len == 0 {
            return;
        }
        let normalized = offset % self.region_size;
        let headspace = self.region_size - normalized;
        // Safety: see `copy_in`.
        unsafe {
            let base = self.buffer.as_ptr();
            if headspace >= len {
                core::ptr::copy_nonoverlapping(base.add(normalized), dst.as_mut_ptr(), len);
            } else {
                core::ptr::copy_nonoverlapping(base.add(normalized), dst.as_mut_ptr(), headspace);
                core::ptr::copy_nonoverlapping(
                    base,
                    dst.as_mut_ptr().add(headspace),
                    len - headspace,
                );
            }
        }
    }
}

/// A fixed-capacity table of up to `N` shared-memory regions.
pub struct Shms<S: Scheduler, const N: usize> {
    registry: spin::Mutex<Registry<State<S::Task>, N>>,
}

impl<S: Scheduler, const N: usize> Shms<S, N> {
    /// An empty table.
    pub fn new() -> Self {
        Shms {
            registry: spin::Mutex::new(Registry::new(ObjectType::Shm)),
        }
    }

    /// Allocates a new region of `size` bytes in `mode`. Ring regions
    /// require `size > 1`; packet regions require `size >
    /// SHM_PACKET_HEADER_SIZE`. `options.packet_max_payload` defaults to
    /// `size - SHM_PACKET_HEADER_SIZE` when unset, zero, or larger than
    /// that.
    pub fn create<A: ShmAllocator>(
        &self,
        alloc: &A,
        size: usize,
        mode: ShmMode,
        options: ShmRegionOptions,
    ) -> Result<Handle, Status> {
        if size == 0 {
            return Err(Status::InvalidArgument);
        }
        if mode == ShmMode::Ring && size <= 1 {
            return Err(Status::InvalidArgument);
        }
        if mode == ShmMode::Packet && size <= SHM_PACKET_HEADER_SIZE {
            return Err(Status::InvalidArgument);
        }

        let packet_max_payload = if mode == ShmMode::Packet {
            let available = size - SHM_PACKET_HEADER_SIZE;
            match options.packet_max_payload {
                Some(v) if v > 0 && v <= available => v,
                _ => available,
            }
        } else {
            0
        };

        let buffer = alloc.allocate(size).ok_or(Status::NoSpace)?;

        let mut registry = self.registry.lock();
        let handle = registry.allocate(State {
            meta: ObjectMeta::new(Generation::FIRST),
            mode,
            buffer,
            region_size: size,
            ring_policy: options.ring_policy,
            head: 0,
            tail: 0,
            used: 0,
            packet_count: 0,
            packet_max_payload,
            attachment_count: 0,
            read_waiters: WaitQueue::new(),
            write_waiters: WaitQueue::new(),
            readable_listeners: Listeners::new(),
            writable_listeners: Listeners::new(),
            reads: 0,
            writes: 0,
            read_timeouts: 0,
            write_timeouts: 0,
            ring_overflows: 0,
            packet_drops: 0,
            attachments: 0,
        });
        if handle.is_err() {
            alloc.deallocate(buffer, size);
            crate::trace::record(crate::trace::Event::RegistryExhausted(ObjectType::Shm));
        }
        handle
    }

    /// Destroys a region: wakes every blocked reader/writer with
    /// [`Status::ObjectDestroyed`], notifies readable/writable listeners
    /// not-ready, and frees the buffer and registry slot immediately if no
    /// attachment remains, or defers the free until the last
    /// [`Shms::detach`] otherwise.
    pub fn destroy<A: ShmAllocator>(&self, sched: &S, alloc: &A, handle: Handle) -> Result<(), Status> {
        let (due_r, due_w, freed) = {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(handle)?;
            if !state.meta.destroy() {
                return Err(Status::ObjectDestroyed);
            }
            state.read_waiters.wake_all(sched, WakeResult::ObjectDestroyed);
            state.write_waiters.wake_all(sched, WakeResult::ObjectDestroyed);
            let due_r = state.readable_listeners.notify_destroyed();
            let due_w = state.writable_listeners.notify_destroyed();
            crate::trace::record(crate::trace::Event::Destroyed(ObjectType::Shm));
            let should_release = state.attachment_count == 0;
            let freed = if should_release {
                let freed = registry.release(handle)?;
                Some((freed.buffer, freed.region_size))
            } else {
                None
            };
            (due_r, due_w, freed)
        };
        for d in due_r {
            d.invoke();
        }
        for d in due_w {
            d.invoke();
        }
        if let Some((ptr, size)) = freed {
            alloc.deallocate(ptr, size);
        }
        Ok(())
    }

    /// Attaches to a region, returning a descriptor used for every
    /// subsequent operation. Fails with [`Status::ObjectDestroyed`] if the
    /// region was destroyed before attaching. `options.cursor_offset` is
    /// clamped to zero if out of range.
    pub fn attach(
        &self,
        handle: Handle,
        mode: AccessMode,
        options: ShmAttachmentOptions,
    ) -> Result<Attachment, Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        state.attachment_count += 1;
        state.attachments += 1;
        let cursor = match options.cursor_offset {
            Some(c) if c < state.region_size => c,
            _ => 0,
        };
        Ok(Attachment { handle, mode, cursor, attached: true })
    }

    /// Detaches `attachment`. If the region was already destroyed and this
    /// was the last attachment, frees the buffer and releases the slot.
    /// Fails with [`Status::NotAttached`], without touching the region, if
    /// `attachment` was already detached.
    pub fn detach<A: ShmAllocator>(
        &self,
        alloc: &A,
        attachment: &mut Attachment,
    ) -> Result<(), Status> {
        if !attachment.attached {
            return Err(Status::NotAttached);
        }
        let freed = {
            let mut registry = self.registry.lock();
            let should_release = {
                let state = registry.get_mut(attachment.handle)?;
                if state.attachment_count > 0 {
                    state.attachment_count -= 1;
                }
                state.meta.is_destroyed() && state.attachment_count == 0
            };
            if should_release {
                let freed = registry.release(attachment.handle)?;
                Some((freed.buffer, freed.region_size))
            } else {
                None
            }
        };
        attachment.attached = false;
        if let Some((ptr, size)) = freed {
            alloc.deallocate(ptr, size);
        }
        Ok(())
    }

    fn check_readable(state: &State<S::Task>, att: &Attachment) -> Result<(), Status> {
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        if !att.mode.contains(AccessMode::READ) {
            return Err(Status::NoPermission);
        }
        Ok(())
    }

    fn check_writable(state: &State<S::Task>, att: &Attachment) -> Result<(), Status> {
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        if !att.mode.contains(AccessMode::WRITE) {
            return Err(Status::NoPermission);
        }
        Ok(())
    }

    /// Non-blocking read; see [`Shms::read_timed`] for the blocking forms.
    pub fn try_read(&self, att: &mut Attachment, buf: &mut [u8]) -> Result<usize, Status> {
        self.read_timed(att, buf, magnolia_abi::NO_WAIT, None, None)
    }

    /// Blocks indefinitely until data is available.
    pub fn read(&self, sched: &S, att: &mut Attachment, buf: &mut [u8]) -> Result<usize, Status> {
        self.read_timed(att, buf, magnolia_abi::FOREVER, Some(sched), None)
    }

    /// Reads with a timeout. `sched`/`clock` are required unless
    /// `timeout_us` is [`magnolia_abi::NO_WAIT`].
    pub fn read_timed(
        &self,
        att: &mut Attachment,
        buf: &mut [u8],
        timeout_us: u64,
        sched: Option<&S>,
        clock: Option<&dyn Clock>,
    ) -> Result<usize, Status> {
        if !att.attached {
            return Err(Status::NotAttached);
        }
        if buf.is_empty() {
            return Err(Status::InvalidArgument);
        }
        let deadline_us = match (timeout_us, clock) {
            (magnolia_abi::FOREVER, _) => None,
            (us, Some(clock)) => Some(clock.now_us().saturating_add(us)),
            (_, None) => None,
        };

        loop {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(att.handle)?;
            Self::check_readable(state, att)?;

            match state.mode {
                ShmMode::Raw => {
                    if att.cursor >= state.region_size {
                        return Err(Status::Empty);
                    }
                    let available = state.region_size - att.cursor;
                    let n = buf.len().min(available);
                    let cursor = att.cursor;
                    state.copy_out(cursor, &mut buf[..n]);
                    att.cursor += n;
                    state.reads += 1;
                    return Ok(n);
                }
                ShmMode::Ring => {
                    if state.used > 0 {
                        let n = buf.len().min(state.used);
                        let head = state.head;
                        let region_size = state.region_size;
                        state.copy_out(head, &mut buf[..n]);
                        state.head = (head + n) % region_size;
                        state.used -= n;
                        state.reads += 1;
                        let due_w = state.writable_listeners.notify(state.is_writable());
                        if let Some(sched) = sched {
                            state.write_waiters.wake_one(sched, WakeResult::Ready);
                        }
                        drop(registry);
                        for d in due_w {
                            d.invoke();
                        }
                        return Ok(n);
                    }
                }
                ShmMode::Packet => {
                    if state.packet_count > 0 {
                        let mut header = [0u8; SHM_PACKET_HEADER_SIZE];
                        let head = state.head;
                        state.copy_out(head, &mut header);
                        let payload = u16::from_le_bytes(header) as usize;
                        let total = SHM_PACKET_HEADER_SIZE + payload;
                        if payload > buf.len() {
                            return Err(Status::InvalidArgument);
                        }
                        let payload_offset = (head + SHM_PACKET_HEADER_SIZE) % state.region_size;
                        state.copy_out(payload_offset, &mut buf[..payload]);
                        let region_size = state.region_size;
                        state.head = (head + total) % region_size;
                        state.used -= total;
                        state.packet_count -= 1;
                        state.reads += 1;
                        let due_w = state.writable_listeners.notify(state.is_writable());
                        if let Some(sched) = sched {
                            state.write_waiters.wake_one(sched, WakeResult::Ready);
                        }
                        drop(registry);
                        for d in due_w {
                            d.invoke();
                        }
                        return Ok(payload);
                    }
                }
            }

            // Not ready. Raw mode never reaches here (handled above).
            if timeout_us == magnolia_abi::NO_WAIT {
                return Err(Status::Empty);
            }
            let sched = sched.ok_or(Status::InvalidArgument)?;
            let task = sched.current_task();
            let waiter = pin!(Waiter::new(task, ()));
            state.meta.waiter_added();
            state.read_waiters.enqueue(waiter.as_ref());
            drop(registry);

            let wake = sched.park(task, deadline_us);

            let mut registry = self.registry.lock();
            if let Ok(state) = registry.get_mut(att.handle) {
                state.read_waiters.remove(waiter.as_ref());
                state.meta.waiter_removed();
                if wake == WakeResult::Timeout {
                    state.read_timeouts += 1;
                    crate::trace::record(crate::trace::Event::Timeout(ObjectType::Shm));
                }
            }
            drop(registry);
            match wake {
                WakeResult::Ready => continue,
                other => return Err(other.into_status()),
            }
        }
    }

    /// Non-blocking write; see [`Shms::write_timed`] for the blocking
    /// forms.
    pub fn try_write(&self, att: &mut Attachment, data: &[u8]) -> Result<(), Status> {
        self.write_timed(att, data, magnolia_abi::NO_WAIT, None, None)
    }

    /// Blocks indefinitely until there is room.
    pub fn write(&self, sched: &S, att: &mut Attachment, data: &[u8]) -> Result<(), Status> {
        self.write_timed(att, data, magnolia_abi::FOREVER, Some(sched), None)
    }

    /// Writes with a timeout. `sched`/`clock` are required unless
    /// `timeout_us` is [`magnolia_abi::NO_WAIT`].
    pub fn write_timed(
        &self,
        att: &mut Attachment,
        data: &[u8],
        timeout_us: u64,
        sched: Option<&S>,
        clock: Option<&dyn Clock>,
    ) -> Result<(), Status> {
        if !att.attached {
            return Err(Status::NotAttached);
        }
        if data.is_empty() {
            return Err(Status::InvalidArgument);
        }
        let deadline_us = match (timeout_us, clock) {
            (magnolia_abi::FOREVER, _) => None,
            (us, Some(clock)) => Some(clock.now_us().saturating_add(us)),
            (_, None) => None,
        };

        loop {
            let mut registry = self.registry.lock();
            let state = registry.get_mut(att.handle)?;
            Self::check_writable(state, att)?;

            match state.mode {
                ShmMode::Raw => {
                    if att.cursor + data.len() > state.region_size {
                        return Err(Status::Full);
                    }
                    let cursor = att.cursor;
                    state.copy_in(cursor, data);
                    att.cursor += data.len();
                    state.writes += 1;
                    return Ok(());
                }
                ShmMode::Ring => {
                    let capacity = state.ring_capacity();
                    if data.len() > capacity {
                        return Err(Status::Full);
                    }
                    if state.ring_free_space() >= data.len() {
                        let tail = state.tail;
                        let region_size = state.region_size;
                        state.copy_in(tail, data);
                        state.tail = (tail + data.len()) % region_size;
                        state.used += data.len();
                        state.writes += 1;
                        let due_r = state.readable_listeners.notify(state.is_readable());
                        if let Some(sched) = sched {
                            state.read_waiters.wake_one(sched, WakeResult::Ready);
                        }
                        drop(registry);
                        for d in due_r {
                            d.invoke();
                        }
                        return Ok(());
                    }
                    if state.ring_policy == RingOverwritePolicy::DropOldest {
                        let free = state.ring_free_space();
                        let drop_amount = (data.len() - free).min(state.used);
                        let region_size = state.region_size;
                        state.head = (state.head + drop_amount) % region_size;
                        state.used -= drop_amount;
                        state.ring_overflows += drop_amount as u32;
                        crate::trace::record(crate::trace::Event::RingOverflow);
                        continue;
                    }
                }
                ShmMode::Packet => {
                    if data.len() > state.packet_max_payload {
                        state.packet_drops += 1;
                        crate::trace::record(crate::trace::Event::PacketDropped);
                        return Err(Status::InvalidArgument);
                    }
                    let total = SHM_PACKET_HEADER_SIZE + data.len();
                    if total > state.region_size {
                        state.packet_drops += 1;
                        crate::trace::record(crate::trace::Event::PacketDropped);
                        return Err(Status::Full);
                    }
                    if state.packet_free_space() >= total {
                        let header = (data.len() as u16).to_le_bytes();
                        let tail = state.tail;
                        let region_size = state.region_size;
                        state.copy_in(tail, &header);
                        let payload_offset = (tail + SHM_PACKET_HEADER_SIZE) % region_size;
                        state.copy_in(payload_offset, data);
                        state.tail = (tail + total) % region_size;
                        state.used += total;
                        state.packet_count += 1;
                        state.writes += 1;
                        let due_r = state.readable_listeners.notify(state.is_readable());
                        if let Some(sched) = sched {
                            state.read_waiters.wake_one(sched, WakeResult::Ready);
                        }
                        drop(registry);
                        for d in due_r {
                            d.invoke();
                        }
                        return Ok(());
                    }
                }
            }

            if timeout_us == magnolia_abi::NO_WAIT {
                return Err(Status::Full);
            }
            let sched = sched.ok_or(Status::InvalidArgument)?;
            let task = sched.current_task();
            let waiter = pin!(Waiter::new(task, ()));
            state.meta.waiter_added();
            state.write_waiters.enqueue(waiter.as_ref());
            drop(registry);

            let wake = sched.park(task, deadline_us);

            let mut registry = self.registry.lock();
            if let Ok(state) = registry.get_mut(att.handle) {
                state.write_waiters.remove(waiter.as_ref());
                state.meta.waiter_removed();
                if wake == WakeResult::Timeout {
                    state.write_timeouts += 1;
                    crate::trace::record(crate::trace::Event::Timeout(ObjectType::Shm));
                }
            }
            drop(registry);
            match wake {
                WakeResult::Ready => continue,
                other => return Err(other.into_status()),
            }
        }
    }

    /// Dispatches a control command. [`ShmControlCommand::Flush`] zeros the
    /// head/tail/used-byte/packet counters without disturbing waiters;
    /// [`ShmControlCommand::Reset`] additionally zeros every stats counter;
    /// the `Notify*` commands wake every blocked reader or writer with
    /// [`Status::Ok`].
    pub fn control(&self, sched: &S, att: &Attachment, cmd: ShmControlCommand) -> Result<(), Status> {
        if !att.attached {
            return Err(Status::NotAttached);
        }
        let mut registry = self.registry.lock();
        let state = registry.get_mut(att.handle)?;
        if state.meta.is_destroyed() {
            return Err(Status::ObjectDestroyed);
        }
        match cmd {
            ShmControlCommand::Flush => {
                state.head = 0;
                state.tail = 0;
                state.used = 0;
                state.packet_count = 0;
            }
            ShmControlCommand::Reset => {
                state.head = 0;
                state.tail = 0;
                state.used = 0;
                state.packet_count = 0;
                state.reads = 0;
                state.writes = 0;
                state.read_timeouts = 0;
                state.write_timeouts = 0;
                state.ring_overflows = 0;
                state.packet_drops = 0;
            }
            ShmControlCommand::NotifyReaders => {
                state.read_waiters.wake_all(sched, WakeResult::Ready);
            }
            ShmControlCommand::NotifyWriters => {
                state.write_waiters.wake_all(sched, WakeResult::Ready);
            }
        }
        Ok(())
    }

    /// Attaches a waitset listener for the region's readability. Fires
    /// once immediately with the current state, then on every
    /// ready/not-ready transition.
    pub fn waitset_subscribe_readable(
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
            let ready = state.is_readable();
            state.readable_listeners.subscribe(callback, user_data, ready)?
        };
        due.invoke();
        Ok(())
    }

    /// Attaches a waitset listener for the region's writability.
    pub fn waitset_subscribe_writable(
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
            let ready = state.is_writable();
            state.writable_listeners.subscribe(callback, user_data, ready)?
        };
        due.invoke();
        Ok(())
    }

    /// Detaches a previously attached readability listener.
    pub fn waitset_unsubscribe_readable(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        state.readable_listeners.unsubscribe(callback, user_data)
    }

    /// Detaches a previously attached writability listener.
    pub fn waitset_unsubscribe_writable(
        &self,
        handle: Handle,
        callback: ReadyCallback,
        user_data: *mut core::ffi::c_void,
    ) -> Result<(), Status> {
        let mut registry = self.registry.lock();
        let state = registry.get_mut(handle)?;
        state.writable_listeners.unsubscribe(callback, user_data)
    }

    /// A point-in-time diagnostic snapshot. `ring_capacity` reports the
    /// true usable capacity (`region_size - 1` for ring regions,
    /// `region_size` for packet regions, `0` for raw).
    pub fn info(&self, handle: Handle) -> Result<ShmInfo, Status> {
        let registry = self.registry.lock();
        let state = registry.get(handle)?;
        let ring_capacity = match state.mode {
            ShmMode::Raw => 0,
            ShmMode::Ring => state.ring_capacity(),
            ShmMode::Packet => state.region_size,
        };
        Ok(ShmInfo {
            common: state.meta.common_info(),
            mode: state.mode,
            region_size: state.region_size as u32,
            ring_capacity: ring_capacity as u32,
            attachment_count: state.attachment_count,
            waiting_readers: state.read_waiters.len() as u32,
            waiting_writers: state.write_waiters.len() as u32,
            used_bytes: state.used as u32,
            packets_in_flight: state.packet_count as u32,
            ring_overflows: state.ring_overflows,
            packet_drops: state.packet_drops,
            reads: state.reads,
            writes: state.writes,
            read_timeouts: state.read_timeouts,
            write_timeouts: state.write_timeouts,
            attachments: state.attachments,
        })
    }
}

impl<S: Scheduler, const N: usize> Default for Shms<S, N> {
    fn default() -> Self {
        Self::new()
    }
}
