// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The Magnolia IPC core.
//!
//! This crate is the application-independent synchronization layer of the
//! Magnolia RTOS: generational handles, wait queues, and the four IPC object
//! families built on top of them (signals, channels, event flags, and shared
//! memory regions), plus the waitset listener mechanism used to multiplex
//! several objects onto one blocking call.
//!
//! Nothing in this crate knows how tasks are scheduled, how time is kept, or
//! where memory comes from. Those are supplied by the host through the
//! [`sched::Scheduler`], [`sched::Clock`], and [`sched::ShmAllocator`]
//! traits. That keeps this crate usable both inside a real kernel and inside
//! a plain host test harness.
//!
//! # Design principles
//!
//! 1. Every object family is built from the same small pieces: a registry
//!    slot with a generation, a lock, a destroyed flag, and a FIFO wait
//!    queue. See [`object`] for the shared building block.
//! 2. Blocking operations follow the same three-phase protocol everywhere:
//!    prepare a waiter and enqueue it under the object's lock, release the
//!    lock and block, then reacquire the lock to remove the waiter and
//!    translate its outcome. See [`waitq`].
//! 3. A strong preference for safe code where reasonable; the one
//!    deliberately unsafe corner is the intrusive wait queue itself, which
//!    trades an allocator for a handful of carefully scoped raw pointers.

#![cfg_attr(not(test), no_std)]

pub mod channel;
pub mod event;
pub mod object;
pub mod registry;
pub mod sched;
pub mod shm;
pub mod signal;
mod trace;
pub mod waitq;
pub mod waitset;

pub use magnolia_abi as abi;
