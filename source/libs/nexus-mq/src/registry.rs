// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-size table of queue slots keyed by application integers
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Registry (resolve/create/retain/release), ActiveQueue, SlotStatus
//! DEPENDS_ON: arena::Arena, host::PageAllocator
//! INVARIANTS: A slot becomes Active only after its arena page is allocated;
//!             one Active slot per key; a slot is freed exactly when refcount reaches 0

use crate::arena::Arena;
use crate::error::{MqError, Result};
use crate::host::PageAllocator;
use crate::{QueueKey, SlotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Free,
    Active,
}

/// State of an active queue.
#[derive(Debug)]
pub struct ActiveQueue {
    pub key: QueueKey,
    pub arena: Arena,
    pub refcount: u32,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Free,
    Active(ActiveQueue),
}

#[derive(Debug, Default)]
struct Slot {
    /// Bumped on every destroy so stale waiters can tell a reused slot apart.
    generation: u32,
    state: SlotState,
}

/// Registry of queue slots.
#[derive(Debug)]
pub struct Registry {
    slots: Vec<Slot>,
}

impl Registry {
    /// Creates a registry with `count` free slots.
    pub fn with_slots(count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        slots.resize_with(count, Slot::default);
        Self { slots }
    }

    pub fn status(&self, id: SlotId) -> Option<SlotStatus> {
        self.slots.get(id.raw()).map(|slot| match slot.state {
            SlotState::Free => SlotStatus::Free,
            SlotState::Active(_) => SlotStatus::Active,
        })
    }

    /// Number of active slots.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| matches!(slot.state, SlotState::Active(_))).count()
    }

    /// Finds the active slot holding `key`.
    pub fn resolve(&self, key: QueueKey) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|slot| matches!(&slot.state, SlotState::Active(q) if q.key == key))
            .map(SlotId)
    }

    /// Activates the lowest free slot for `key` with refcount 1.
    pub fn create(&mut self, key: QueueKey, pages: &dyn PageAllocator) -> Result<SlotId> {
        let Some(index) = self.slots.iter().position(|slot| matches!(slot.state, SlotState::Free))
        else {
            log::warn!("mq: create key={} failed: no free slot", key);
            return Err(MqError::ResourceExhausted);
        };
        let Some(page) = pages.alloc_page() else {
            log::warn!("mq: create key={} failed: page allocation", key);
            return Err(MqError::AllocationFailed);
        };
        let arena = match Arena::new(page) {
            Ok(arena) => arena,
            Err(page) => {
                log::warn!("mq: create key={} failed: unusable page of {} bytes", key, page.len());
                pages.free_page(page);
                return Err(MqError::AllocationFailed);
            }
        };
        self.slots[index].state = SlotState::Active(ActiveQueue { key, arena, refcount: 1 });
        log::debug!("mq: created slot {} for key {}", index, key);
        Ok(SlotId(index))
    }

    pub fn active(&self, id: SlotId) -> Result<&ActiveQueue> {
        match self.slots.get(id.raw()).map(|slot| &slot.state) {
            Some(SlotState::Active(queue)) => Ok(queue),
            _ => Err(MqError::InvalidId),
        }
    }

    pub fn active_mut(&mut self, id: SlotId) -> Result<&mut ActiveQueue> {
        match self.slots.get_mut(id.raw()).map(|slot| &mut slot.state) {
            Some(SlotState::Active(queue)) => Ok(queue),
            _ => Err(MqError::InvalidId),
        }
    }

    pub fn generation(&self, id: SlotId) -> Option<u32> {
        self.slots.get(id.raw()).map(|slot| slot.generation)
    }

    /// Adds one reference to an active slot. A saturated refcount is left
    /// untouched and reported as `ResourceExhausted`.
    pub fn retain(&mut self, id: SlotId) -> Result<u32> {
        let queue = self.active_mut(id)?;
        let Some(refcount) = queue.refcount.checked_add(1) else {
            log::warn!("mq: slot {} refcount saturated", id);
            return Err(MqError::ResourceExhausted);
        };
        queue.refcount = refcount;
        Ok(refcount)
    }

    /// Drops one reference; destroys the slot and frees its page at zero.
    /// Returns `true` if the slot was destroyed.
    pub fn release(&mut self, id: SlotId, pages: &dyn PageAllocator) -> Result<bool> {
        let queue = self.active_mut(id)?;
        queue.refcount = queue.refcount.saturating_sub(1);
        if queue.refcount > 0 {
            return Ok(false);
        }
        let slot = &mut self.slots[id.raw()];
        if let SlotState::Active(queue) = core::mem::take(&mut slot.state) {
            log::debug!("mq: destroyed slot {} (key {})", id, queue.key);
            pages.free_page(queue.arena.into_page());
        }
        slot.generation = slot.generation.wrapping_add(1);
        Ok(true)
    }
}
