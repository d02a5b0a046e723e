// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Process-to-queue membership tracking
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: SlotMask, Membership, MAX_SLOTS
//! INVARIANTS: A process holds at most one reference per slot; masks are 32 bits wide,
//!             so at most MAX_SLOTS slots are addressable

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use crate::{Pid, SlotId};

/// Number of slots a membership mask can address.
pub const MAX_SLOTS: usize = u32::BITS as usize;

static_assertions::const_assert_eq!(MAX_SLOTS, 32);

/// Set of slot indices, one bit per slot.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct SlotMask(u32);

impl SlotMask {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self(u32::MAX);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Mask containing only `id`, or `None` if `id` cannot be represented.
    pub fn single(id: SlotId) -> Option<Self> {
        (id.raw() < MAX_SLOTS).then(|| Self(1 << id.raw()))
    }

    pub fn contains(self, id: SlotId) -> bool {
        id.raw() < MAX_SLOTS && self.0 >> id.raw() & 1 == 1
    }

    /// Adds `id`; returns `true` if it was not present.
    pub fn insert(&mut self, id: SlotId) -> bool {
        let Some(bit) = Self::single(id) else {
            return false;
        };
        let fresh = self.0 & bit.0 == 0;
        self.0 |= bit.0;
        fresh
    }

    /// Removes `id`; returns `true` if it was present.
    pub fn remove(&mut self, id: SlotId) -> bool {
        let present = self.contains(id);
        if present {
            self.0 &= !(1 << id.raw());
        }
        present
    }

    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Slot ids in ascending order.
    pub fn iter(self) -> impl Iterator<Item = SlotId> {
        (0..MAX_SLOTS).filter(move |bit| self.0 >> bit & 1 == 1).map(SlotId)
    }
}

impl fmt::Debug for SlotMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotMask({:#010x})", self.0)
    }
}

impl BitOr for SlotMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromIterator<SlotId> for SlotMask {
    fn from_iter<I: IntoIterator<Item = SlotId>>(iter: I) -> Self {
        let mut mask = Self::EMPTY;
        for id in iter {
            mask.insert(id);
        }
        mask
    }
}

/// Membership masks for every process that joined at least one queue.
#[derive(Debug, Default)]
pub struct Membership {
    masks: BTreeMap<Pid, SlotMask>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mask(&self, pid: Pid) -> SlotMask {
        self.masks.get(&pid).copied().unwrap_or_default()
    }

    /// Records that `pid` joined `id`. Returns `true` on the first association.
    pub fn associate(&mut self, pid: Pid, id: SlotId) -> bool {
        self.masks.entry(pid).or_default().insert(id)
    }

    /// Clears the bits of `mask` that `pid` holds and returns them.
    pub fn release(&mut self, pid: Pid, mask: SlotMask) -> SlotMask {
        let Some(current) = self.masks.get_mut(&pid) else {
            return SlotMask::EMPTY;
        };
        let released = current.intersection(mask);
        *current = SlotMask(current.0 & !released.0);
        if current.is_empty() {
            self.masks.remove(&pid);
        }
        released
    }

    /// Gives `child` the bits of `mask` in addition to its own.
    pub fn inherit(&mut self, child: Pid, mask: SlotMask) {
        if mask.is_empty() {
            return;
        }
        let entry = self.masks.entry(child).or_default();
        *entry = *entry | mask;
    }

    /// Drops `id` from every process, used when the slot is destroyed.
    pub fn forget_slot(&mut self, id: SlotId) {
        self.masks.retain(|_, mask| {
            mask.remove(id);
            !mask.is_empty()
        });
    }
}
