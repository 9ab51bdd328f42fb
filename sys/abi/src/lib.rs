// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared types for the Magnolia IPC core: handles, status codes, and the
//! small set of value types that flow across the boundary between the core
//! and the scheduler that hosts it.
//!
//! Nothing in this crate is specific to any one object family (signals,
//! channels, event flags, shared memory). Family-specific types live next to
//! their implementations in `magnolia-ipc-core`.

#![no_std]

use bitflags::bitflags;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of bits of a [`Handle`] given to the slot index.
pub const HANDLE_INDEX_BITS: u32 = 12;
/// Number of bits given to the object type tag.
pub const HANDLE_TYPE_BITS: u32 = 4;
/// Number of bits given to the generation counter.
pub const HANDLE_GEN_BITS: u32 = 16;

const INDEX_MASK: u32 = (1 << HANDLE_INDEX_BITS) - 1;
const TYPE_SHIFT: u32 = HANDLE_INDEX_BITS;
const TYPE_MASK: u32 = (1 << HANDLE_TYPE_BITS) - 1;
const GEN_SHIFT: u32 = HANDLE_INDEX_BITS + HANDLE_TYPE_BITS;
const GEN_MASK: u32 = (1 << HANDLE_GEN_BITS) - 1;

/// Maximum number of live objects of a single family (bounded by the index
/// field's width).
pub const MAX_OBJECTS_PER_FAMILY: usize = 1 << HANDLE_INDEX_BITS;

/// A generational handle to an IPC object.
///
/// The bit layout, from least to most significant, is:
///
/// - bits `0..12`: slot index within the owning registry
/// - bits `12..16`: [`ObjectType`] tag
/// - bits `16..32`: generation, bumped every time a slot is reused
///
/// `Handle::INVALID` (all zero bits) never refers to a live object: slot
/// index zero is never handed out, and generation zero is skipped when the
/// counter wraps. A handle is otherwise opaque to callers; they are expected
/// to treat it as a token, not to inspect or construct it by hand.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(transparent)]
pub struct Handle(pub u32);

impl Handle {
    /// The reserved invalid handle; never returned by a successful create.
    pub const INVALID: Handle = Handle(0);

    /// Packs a slot index, object type, and generation into a handle.
    ///
    /// `index` must fit in [`HANDLE_INDEX_BITS`] bits and `generation` in
    /// [`HANDLE_GEN_BITS`] bits; both are masked, so callers that pass
    /// oversized values will get back a different handle rather than a
    /// panic.
    pub const fn pack(index: u32, ty: ObjectType, generation: Generation) -> Handle {
        let bits = (index & INDEX_MASK)
            | ((ty as u32 & TYPE_MASK) << TYPE_SHIFT)
            | ((generation.0 as u32 & GEN_MASK) << GEN_SHIFT);
        Handle(bits)
    }

    /// Extracts the slot index.
    pub const fn index(self) -> u32 {
        self.0 & INDEX_MASK
    }

    /// Extracts the raw object type tag, without validating that it names a
    /// known [`ObjectType`].
    pub const fn type_tag(self) -> u32 {
        (self.0 >> TYPE_SHIFT) & TYPE_MASK
    }

    /// Extracts the object type, if the tag bits name a known family.
    pub const fn object_type(self) -> Option<ObjectType> {
        ObjectType::from_tag(self.type_tag())
    }

    /// Extracts the generation.
    pub const fn generation(self) -> Generation {
        Generation(((self.0 >> GEN_SHIFT) & GEN_MASK) as u16)
    }

    /// True for every handle except [`Handle::INVALID`].
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl core::fmt::Debug for Handle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handle")
            .field("index", &self.index())
            .field("type", &self.type_tag())
            .field("generation", &self.generation().0)
            .finish()
    }
}

/// A generation counter attached to a registry slot.
///
/// Generation zero is never assigned to a live object: it is reserved so
/// that a zeroed `Handle` is always invalid, and the counter skips back to
/// one (not zero) when it wraps past `u16::MAX`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Default, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Generation(pub u16);

impl Generation {
    /// The first generation ever assigned to a slot.
    pub const FIRST: Generation = Generation(1);

    /// Returns the generation a slot should carry the next time it is
    /// reused, skipping zero.
    #[must_use]
    pub const fn next(self) -> Generation {
        let n = self.0.wrapping_add(1);
        if n == 0 {
            Generation(1)
        } else {
            Generation(n)
        }
    }
}

/// The object family a [`Handle`] belongs to.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u32)]
pub enum ObjectType {
    Signal = 1,
    Channel = 2,
    EventFlags = 3,
    Shm = 4,
}

impl ObjectType {
    const fn from_tag(tag: u32) -> Option<ObjectType> {
        match tag {
            1 => Some(ObjectType::Signal),
            2 => Some(ObjectType::Channel),
            3 => Some(ObjectType::EventFlags),
            4 => Some(ObjectType::Shm),
            _ => None,
        }
    }
}

/// Result codes returned by every public IPC core operation.
///
/// There is no separate "fault" escalation path here: callers are expected
/// to check and handle every variant. `Ok` is the only success value.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Status {
    /// The operation completed normally.
    Ok,
    /// The handle does not name a live object of the expected type.
    InvalidHandle,
    /// An argument was out of range or otherwise malformed.
    InvalidArgument,
    /// The object the handle referred to has been destroyed.
    ObjectDestroyed,
    /// The deadline elapsed before the operation could complete.
    Timeout,
    /// A non-blocking call found the object not ready.
    NotReady,
    /// A bounded resource (queue slot, registry slot) had no room.
    NoSpace,
    /// A receive-style operation found nothing available.
    Empty,
    /// A send-style operation found no room available.
    Full,
    /// The caller's access mode does not permit the requested operation.
    NoPermission,
    /// The caller is not attached to the region it addressed.
    NotAttached,
    /// The core is shutting down and is no longer servicing waits.
    Shutdown,
    /// The requested combination of mode and operation is not supported.
    NotSupported,
}

impl Status {
    /// True for [`Status::Ok`].
    pub const fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// A `Result` alias used throughout the core; `Status::Ok` is never
/// constructed as an `Err`, so the success type is typically `()` or a
/// small value, with `Status` describing every failure.
pub type Result<T> = core::result::Result<T, Status>;

/// The outcome delivered to a task that blocked in a wait queue.
///
/// This is the payload a scheduler's `unpark` carries back to the blocked
/// `park` call; the core translates it into a [`Status`] once the caller's
/// lock is reacquired.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum WakeResult {
    /// The condition the task was waiting for became true.
    Ready,
    /// The deadline elapsed first.
    Timeout,
    /// The object was destroyed while the task was waiting.
    ObjectDestroyed,
    /// The core is shutting down.
    Shutdown,
}

impl WakeResult {
    /// Translates a wake outcome into the [`Status`] handed back to the
    /// caller of a blocking operation.
    pub const fn into_status(self) -> Status {
        match self {
            WakeResult::Ready => Status::Ok,
            WakeResult::Timeout => Status::Timeout,
            WakeResult::ObjectDestroyed => Status::ObjectDestroyed,
            WakeResult::Shutdown => Status::Shutdown,
        }
    }
}

/// Sentinel deadline meaning "block indefinitely".
pub const FOREVER: u64 = u64::MAX;

/// Sentinel deadline meaning "do not block at all".
pub const NO_WAIT: u64 = 0;

/// The two flavors of [`Signal`](crate documentation for `magnolia-ipc-core`).
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SignalMode {
    /// The signal latches a single pending event; setting it while it is
    /// already pending is a no-op, and one waiter is released per set.
    OneShot,
    /// The signal accumulates a non-negative count; each set increments the
    /// counter and each successful wait decrements it.
    Counting,
}

/// How an event-flags wait interprets its requested mask against the
/// flags that are currently set.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventWaitMode {
    /// Satisfied once *any* bit in the requested mask is set.
    Any,
    /// Satisfied once *every* bit in the requested mask is set.
    All,
    /// Satisfied according to the object's [`EventMaskMode`]: either an
    /// exact match or a superset match against the requested mask.
    Mask,
}

/// How [`EventWaitMode::Mask`] compares the requested mask against the
/// flags that are currently set.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventMaskMode {
    /// Satisfied only when the current mask is bit-for-bit equal to the
    /// requested mask.
    Exact,
    /// Satisfied when the current mask contains every bit of the
    /// requested mask, plus possibly others.
    Superset,
}

/// Whether a satisfied event-flags wait clears the bits it observed.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventClearMode {
    /// The matching bits are cleared atomically with the wait being
    /// satisfied.
    AutoClear,
    /// Bits are left set; a later call to `clear` removes them explicitly.
    ManualClear,
}

/// The access rights an attachment holds on a shared-memory region.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
bitflags! {
    #[derive(Clone, Copy, Eq, PartialEq, Debug)]
    pub struct AccessMode: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// The three data-movement disciplines a shared-memory region can be
/// configured with.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShmMode {
    /// A flat byte buffer; each attachment keeps its own read/write cursor
    /// and never blocks.
    Raw,
    /// A circular byte buffer with a single shared head/tail.
    Ring,
    /// A circular buffer of length-prefixed messages with no partial
    /// delivery.
    Packet,
}

/// What a [`ShmMode::Ring`] region does when a write would overwrite data
/// that has not yet been read.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RingOverwritePolicy {
    /// The writer blocks (or returns `Full`/`Timeout` in non-blocking or
    /// timed form) until enough space is freed by a reader.
    BlockWriter,
    /// The writer proceeds immediately, discarding the oldest unread bytes.
    DropOldest,
}

/// Creation-time options for a [`ShmMode::Ring`] or [`ShmMode::Packet`]
/// region. Ignored (and optional) for [`ShmMode::Raw`].
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShmRegionOptions {
    /// Ring mode only; meaningless (and ignored) otherwise.
    pub ring_policy: RingOverwritePolicy,
    /// Packet mode only. `None` (or `Some(0)`, or a value larger than the
    /// region can hold) defaults to `size - PACKET_HEADER_SIZE`.
    pub packet_max_payload: Option<usize>,
}

impl Default for RingOverwritePolicy {
    fn default() -> Self {
        RingOverwritePolicy::BlockWriter
    }
}

/// Attachment-time options for [`ShmMode::Raw`] regions.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShmAttachmentOptions {
    /// Initial byte cursor for a raw-mode attachment. Out-of-range values
    /// are clamped to zero. Ignored for ring and packet modes.
    pub cursor_offset: Option<usize>,
}

/// Size, in bytes, of the length header prefixing every packet in a
/// [`ShmMode::Packet`] region.
pub const SHM_PACKET_HEADER_SIZE: usize = 2;

/// Commands dispatched through the shared-memory `control` entry point.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ShmControlCommand {
    /// Zero the ring/packet head, tail, and byte counters. Parked waiters
    /// are left parked.
    Flush,
    /// [`ShmControlCommand::Flush`] plus reset every stats counter to zero.
    Reset,
    /// Wake every blocked reader with [`Status::Ok`], for coordinated
    /// shutdown.
    NotifyReaders,
    /// Wake every blocked writer with [`Status::Ok`], for coordinated
    /// shutdown.
    NotifyWriters,
}

/// Point-in-time diagnostic state common to every object family.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CommonInfo {
    pub destroyed: bool,
    pub waiting_tasks: u32,
}

/// Diagnostic snapshot of a signal.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SignalInfo {
    pub common: CommonInfo,
    pub mode: SignalMode,
    pub ready: bool,
    pub count: u32,
    pub sets: u32,
    pub waits: u32,
    pub timeouts: u32,
}

/// Diagnostic snapshot of a bounded channel.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ChannelInfo {
    pub common: CommonInfo,
    pub capacity: u32,
    pub depth: u32,
    pub message_size: u32,
    pub waiting_senders: u32,
    pub waiting_receivers: u32,
}

/// Diagnostic snapshot of an event-flags group.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventFlagsInfo {
    pub common: CommonInfo,
    pub mask: u32,
    pub clear_mode: EventClearMode,
    pub mask_mode: EventMaskMode,
    /// Whether any waiter's predicate would currently be satisfied is not
    /// well-defined for a group with no waiters; this instead reports
    /// whether `mask` is nonzero, i.e. whether any flags are set at all.
    pub ready: bool,
    pub sets: u32,
    pub waits: u32,
    pub timeouts: u32,
}

/// Diagnostic snapshot of a shared-memory region.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ShmInfo {
    pub common: CommonInfo,
    pub mode: ShmMode,
    pub region_size: u32,
    /// Ring and packet mode only: usable byte capacity, always
    /// `region_size - 1` for ring regions (one byte is reserved to
    /// distinguish full from empty) and `region_size` for packet regions.
    /// Zero for raw mode.
    pub ring_capacity: u32,
    pub attachment_count: u32,
    pub waiting_readers: u32,
    pub waiting_writers: u32,
    /// Ring mode: bytes currently buffered. Packet mode: bytes currently
    /// buffered across all in-flight packets. Raw mode: always zero.
    pub used_bytes: u32,
    /// Packet mode only: number of whole packets currently buffered.
    pub packets_in_flight: u32,
    /// Ring mode only: number of writes that triggered an overwrite.
    pub ring_overflows: u32,
    /// Packet mode only: number of sends rejected for exceeding the
    /// region's maximum payload size.
    pub packet_drops: u32,
    /// Lifetime count of completed reads (raw reads, ring reads, or packet
    /// receives).
    pub reads: u32,
    /// Lifetime count of completed writes (raw writes, ring writes, or
    /// packet sends).
    pub writes: u32,
    pub read_timeouts: u32,
    pub write_timeouts: u32,
    /// Lifetime count of attachments ever created (not current count; see
    /// `attachment_count` for that).
    pub attachments: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_roundtrip() {
        let h = Handle::pack(42, ObjectType::Channel, Generation(7));
        assert_eq!(h.index(), 42);
        assert_eq!(h.object_type(), Some(ObjectType::Channel));
        assert_eq!(h.generation().0, 7);
        assert!(h.is_valid());
    }

    #[test]
    fn invalid_handle_is_zero() {
        assert_eq!(Handle::INVALID.0, 0);
        assert!(!Handle::INVALID.is_valid());
    }

    #[test]
    fn generation_wraps_skipping_zero() {
        let g = Generation(u16::MAX);
        assert_eq!(g.next(), Generation(1));
    }

    #[test]
    fn generation_increments_normally() {
        assert_eq!(Generation(5).next(), Generation(6));
    }

    #[test]
    fn wake_result_translates_to_status() {
        assert_eq!(WakeResult::Ready.into_status(), Status::Ok);
        assert_eq!(WakeResult::Timeout.into_status(), Status::Timeout);
        assert_eq!(
            WakeResult::ObjectDestroyed.into_status(),
            Status::ObjectDestroyed
        );
        assert_eq!(WakeResult::Shutdown.into_status(), Status::Shutdown);
    }

    #[test]
    fn access_mode_combines() {
        let rw = AccessMode::READ | AccessMode::WRITE;
        assert_eq!(rw, AccessMode::READ_WRITE);
        assert!(rw.contains(AccessMode::READ));
    }
}
