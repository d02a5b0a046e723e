// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Kernel-resident typed message queues with blocking send/receive
//! OWNERS: @kernel-ipc-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit + property tests per module, integration tests in tests/
//!
//! PUBLIC API:
//!   - MessageQueues: subsystem state object (get/send/receive/detach/propagate)
//!   - Blocker, PageAllocator: collaborator seams (suspend/wake, page allocator)
//!   - CondvarBlocker, HeapPages: host implementations of the seams
//!   - MqConfig: subsystem configuration
//!   - MqError: error taxonomy
//!
//! DEPENDENCIES:
//!   - parking_lot: global lock and condition variable
//!   - thiserror: error types
//!   - log: diagnostics
//!   - serde/toml: configuration
//!
//! INVARIANTS:
//!   - One global lock serialises every mutation across all queues
//!   - used <= capacity for every arena; arena records are packed from offset 0
//!   - A key maps to at most one active slot

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]

use core::fmt;

pub mod arena;
pub mod config;
pub mod error;
pub mod host;
pub mod membership;
pub mod queue;
pub mod record;
pub mod registry;
pub mod waitq;

pub use config::MqConfig;
pub use error::{MqError, Result};
pub use host::{Blocker, CondvarBlocker, HeapPages, Page, PageAllocator};
pub use membership::SlotMask;
pub use queue::{MessageQueues, MqState, QueueStats, Wait};

/// Process identifier as seen by the queue subsystem.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a queue slot in the registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

impl SlotId {
    #[inline]
    pub fn raw(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application-chosen queue key.
pub type QueueKey = i32;

/// Caller-chosen message type tag. No value is reserved as a wildcard.
pub type MessageType = i32;
