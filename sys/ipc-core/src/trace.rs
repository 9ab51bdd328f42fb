// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Crate-wide diagnostic trace.
//!
//! Every object family calls [`record`] at the handful of points a
//! postmortem debugger cares about: destruction, timeouts, registry
//! exhaustion, and the lossy paths (ring overwrite, packet drop). This is
//! strictly for human observability; nothing in this crate branches on it.
//!
//! The ring buffer keeps the most recent entries for `humility ringbuf` (or
//! GDB) to dump after the fact; the counters survive even after an entry has
//! been evicted from the ring.

use magnolia_abi::ObjectType;

/// One notable event, recorded for diagnostics only.
#[derive(Copy, Clone, PartialEq, Eq, Debug, counters::Count)]
pub enum Event {
    #[count(skip)]
    None,
    Destroyed(ObjectType),
    Timeout(ObjectType),
    RegistryExhausted(ObjectType),
    RingOverflow,
    PacketDropped,
}

ringbuf::ringbuf!(Event, 64, Event::None);
counters::counters!(EVENT_COUNTS, Event);

/// Records `event` in the trace ring buffer and bumps its lifetime counter.
pub fn record(event: Event) {
    ringbuf::ringbuf_entry!(event);
    counters::count!(EVENT_COUNTS, event);
}
