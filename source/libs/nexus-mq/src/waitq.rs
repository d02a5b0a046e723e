// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Bounded FIFO of processes blocked in send or receive
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: WaitQueue (park/drain/len), ParkOutcome
//! INVARIANTS: Capacity fixed at construction (max schedulable processes);
//!             a pid appears at most once; drain empties the queue in enqueue order

use std::collections::VecDeque;

use crate::Pid;

#[must_use = "park outcomes must be handled"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    Parked,
    AlreadyParked,
    Rejected { capacity: usize },
}

#[derive(Debug)]
pub struct WaitQueue {
    entries: VecDeque<Pid>,
    capacity: usize,
}

impl WaitQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: VecDeque::with_capacity(capacity), capacity }
    }

    /// Appends `pid` unless it is already waiting or the queue is full.
    pub fn park(&mut self, pid: Pid) -> ParkOutcome {
        if self.entries.contains(&pid) {
            return ParkOutcome::AlreadyParked;
        }
        if self.entries.len() >= self.capacity {
            return ParkOutcome::Rejected { capacity: self.capacity };
        }
        self.entries.push_back(pid);
        ParkOutcome::Parked
    }

    /// Removes every waiter, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Pid> + '_ {
        self.entries.drain(..)
    }

    /// Drops `pid` if present.
    pub fn cancel(&mut self, pid: Pid) {
        self.entries.retain(|waiting| *waiting != pid);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
