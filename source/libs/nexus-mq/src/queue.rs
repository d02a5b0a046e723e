// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Message-queue subsystem: lookup, blocking send/receive, membership lifecycle
//!
//! OWNERS: @kernel-ipc-team
//!
//! PUBLIC API:
//!   - MessageQueues::new(): build the subsystem from config and collaborators
//!   - MessageQueues::get(): resolve-or-create a queue and associate the caller
//!   - MessageQueues::send()/try_send(): append a typed record, blocking while full
//!   - MessageQueues::receive()/receive_into()/try_receive(): take the first record
//!     of exactly the requested type, blocking while none is present
//!   - MessageQueues::detach()/exit(): drop memberships, destroying idle queues
//!   - MessageQueues::propagate()/fork(): duplicate memberships
//!
//! INVARIANTS:
//!   - Every mutation happens under the single global lock
//!   - A blocked caller always re-checks its condition after waking
//!   - Every successful send wakes all blocked receivers; every successful
//!     receive wakes all blocked senders
//!   - Destroying a slot wakes all waiters; those blocked on it return QueueRemoved
//!
//! ERROR CONDITIONS:
//!   - MqError::InvalidId: slot out of range or not active
//!   - MqError::ResourceExhausted / AllocationFailed: create failures
//!   - MqError::MessageTooLarge: payload or receive buffer exceeds an empty arena
//!   - MqError::WouldBlock: non-blocking attempt without progress
//!   - MqError::QueueRemoved: slot destroyed while the caller slept
//!   - MqError::WaitQueueFull: too many distinct blocked processes
//!
//! DEPENDENCIES:
//!   - parking_lot::Mutex: global lock
//!   - host::{Blocker, PageAllocator}: suspension and arena pages

use core::fmt;

use parking_lot::{Mutex, MutexGuard};

use crate::config::MqConfig;
use crate::error::{MqError, Result};
use crate::host::{Blocker, CondvarBlocker, HeapPages, PageAllocator};
use crate::membership::{Membership, SlotMask};
use crate::registry::Registry;
use crate::waitq::{ParkOutcome, WaitQueue};
use crate::{MessageType, Pid, QueueKey, SlotId};

/// Behaviour of a send or receive when it cannot progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return `WouldBlock` immediately.
    NonBlocking,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Send,
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Send => "send",
            Self::Receive => "receive",
        })
    }
}

/// Snapshot of one active queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub key: QueueKey,
    pub used: usize,
    pub capacity: usize,
    pub refcount: u32,
    pub records: usize,
}

/// State guarded by the global queue lock.
#[derive(Debug)]
pub struct MqState {
    registry: Registry,
    membership: Membership,
    senders: WaitQueue,
    receivers: WaitQueue,
}

impl MqState {
    fn new(config: &MqConfig) -> Self {
        Self {
            registry: Registry::with_slots(config.slots),
            membership: Membership::new(),
            senders: WaitQueue::with_capacity(config.max_processes),
            receivers: WaitQueue::with_capacity(config.max_processes),
        }
    }

    fn waiters(&mut self, direction: Direction) -> &mut WaitQueue {
        match direction {
            Direction::Send => &mut self.senders,
            Direction::Receive => &mut self.receivers,
        }
    }

    /// Generation of an active slot, for detecting destruction across sleeps.
    fn enter(&self, id: SlotId) -> Result<u32> {
        self.registry.active(id)?;
        self.registry.generation(id).ok_or(MqError::InvalidId)
    }

    fn still_live(&self, id: SlotId, generation: u32) -> Result<()> {
        if self.registry.generation(id) == Some(generation) && self.registry.active(id).is_ok() {
            Ok(())
        } else {
            Err(MqError::QueueRemoved)
        }
    }
}

/// The message-queue subsystem.
pub struct MessageQueues<B = CondvarBlocker, A = HeapPages> {
    state: Mutex<MqState>,
    blocker: B,
    pages: A,
}

impl MessageQueues<CondvarBlocker, HeapPages> {
    /// Subsystem backed by host threads and heap pages.
    pub fn host(config: &MqConfig) -> Result<Self> {
        Self::new(config, CondvarBlocker::new(), HeapPages::new(config.page_size))
    }
}

impl<B: Blocker, A: PageAllocator> MessageQueues<B, A> {
    pub fn new(config: &MqConfig, blocker: B, pages: A) -> Result<Self> {
        config.validate()?;
        log::info!(
            "mq: init slots={} max_processes={} page_size={}",
            config.slots,
            config.max_processes,
            config.page_size
        );
        Ok(Self { state: Mutex::new(MqState::new(config)), blocker, pages })
    }

    pub fn pages(&self) -> &A {
        &self.pages
    }

    /// Resolves `key`, creating the queue if absent, and associates `pid`
    /// with it. Repeated calls by the same process add no references.
    pub fn get(&self, pid: Pid, key: QueueKey) -> Result<SlotId> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.registry.resolve(key) {
            Some(id) => {
                if !state.membership.mask(pid).contains(id) {
                    state.registry.retain(id)?;
                    state.membership.associate(pid, id);
                }
                Ok(id)
            }
            None => {
                let id = state.registry.create(key, &self.pages)?;
                state.membership.associate(pid, id);
                Ok(id)
            }
        }
    }

    /// Appends a record, blocking while the arena lacks room.
    pub fn send(&self, pid: Pid, id: SlotId, ty: MessageType, payload: &[u8]) -> Result<()> {
        self.send_with(pid, id, ty, payload, Wait::Blocking)
    }

    pub fn try_send(&self, pid: Pid, id: SlotId, ty: MessageType, payload: &[u8]) -> Result<()> {
        self.send_with(pid, id, ty, payload, Wait::NonBlocking)
    }

    pub fn send_with(
        &self,
        pid: Pid,
        id: SlotId,
        ty: MessageType,
        payload: &[u8],
        wait: Wait,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let generation = state.enter(id)?;
        let limit = state.registry.active(id)?.arena.max_payload();
        if payload.len() > limit {
            return Err(MqError::MessageTooLarge { len: payload.len(), limit });
        }

        let mut parked = false;
        let result = loop {
            if let Err(err) = state.still_live(id, generation) {
                break Err(err);
            }
            let queue = match state.registry.active_mut(id) {
                Ok(queue) => queue,
                Err(err) => break Err(err),
            };
            if queue.arena.fits(payload.len()) {
                let appended = queue.arena.append(ty, payload);
                if appended.is_ok() {
                    self.wake_all(&mut state.receivers);
                }
                break appended.map(|_| ());
            }
            if wait == Wait::NonBlocking {
                break Err(MqError::WouldBlock);
            }
            if let Err(err) = self.block(&mut state, Direction::Send, pid, id) {
                break Err(err);
            }
            parked = true;
        };
        if parked {
            state.senders.cancel(pid);
        }
        result
    }

    /// Takes the first record tagged `ty` and returns exactly `buffer_size`
    /// bytes of it: truncated, or zero-padded when the payload is shorter.
    /// `buffer_size` may not exceed the arena's largest payload.
    pub fn receive(
        &self,
        pid: Pid,
        id: SlotId,
        ty: MessageType,
        buffer_size: usize,
    ) -> Result<Vec<u8>> {
        let mut buf = self.receive_buffer(id, buffer_size)?;
        self.receive_with(pid, id, ty, &mut buf, Wait::Blocking)?;
        Ok(buf)
    }

    pub fn try_receive(
        &self,
        pid: Pid,
        id: SlotId,
        ty: MessageType,
        buffer_size: usize,
    ) -> Result<Vec<u8>> {
        let mut buf = self.receive_buffer(id, buffer_size)?;
        self.receive_with(pid, id, ty, &mut buf, Wait::NonBlocking)?;
        Ok(buf)
    }

    /// Blocking receive into `buf`; returns the full payload size.
    pub fn receive_into(&self, pid: Pid, id: SlotId, ty: MessageType, buf: &mut [u8]) -> Result<usize> {
        self.receive_with(pid, id, ty, buf, Wait::Blocking)
    }

    pub fn receive_with(
        &self,
        pid: Pid,
        id: SlotId,
        ty: MessageType,
        buf: &mut [u8],
        wait: Wait,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        let generation = state.enter(id)?;

        let mut parked = false;
        let result = loop {
            if let Err(err) = state.still_live(id, generation) {
                break Err(err);
            }
            let queue = match state.registry.active_mut(id) {
                Ok(queue) => queue,
                Err(err) => break Err(err),
            };
            match queue.arena.take_first(ty, buf) {
                Ok(Some(size)) => {
                    self.wake_all(&mut state.senders);
                    break Ok(size);
                }
                Ok(None) => {}
                Err(err) => {
                    log::error!("mq: slot {} arena corrupt: {}", id, err);
                    break Err(err);
                }
            }
            if wait == Wait::NonBlocking {
                break Err(MqError::WouldBlock);
            }
            if let Err(err) = self.block(&mut state, Direction::Receive, pid, id) {
                break Err(err);
            }
            parked = true;
        };
        if parked {
            state.receivers.cancel(pid);
        }
        result
    }

    /// Drops the memberships of `pid` named in `mask`, destroying every slot
    /// whose refcount reaches zero. Bits `pid` does not hold are ignored.
    pub fn detach(&self, pid: Pid, mask: SlotMask) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let released = state.membership.release(pid, mask);
        for id in released.iter() {
            self.release_slot(state, id);
        }
    }

    /// Process-exit cleanup: detaches every queue `pid` joined.
    pub fn exit(&self, pid: Pid) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.senders.cancel(pid);
        state.receivers.cancel(pid);
        let released = state.membership.release(pid, SlotMask::ALL);
        for id in released.iter() {
            self.release_slot(state, id);
        }
    }

    /// Adds one reference to every active slot in `mask` without touching
    /// any process's membership.
    pub fn propagate(&self, mask: SlotMask) {
        let mut state = self.state.lock();
        for id in mask.iter() {
            if state.registry.retain(id).is_err() {
                log::warn!("mq: propagate skipped inactive slot {}", id);
            }
        }
    }

    /// Process-duplication: `child` inherits the memberships of `parent`.
    pub fn fork(&self, parent: Pid, child: Pid) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let inherited = state.membership.mask(parent);
        let fresh = SlotMask::from_bits(inherited.bits() & !state.membership.mask(child).bits());
        let mut retained = SlotMask::EMPTY;
        for id in fresh.iter() {
            if state.registry.retain(id).is_ok() {
                retained.insert(id);
            } else {
                log::warn!("mq: fork skipped slot {}", id);
            }
        }
        state.membership.inherit(child, retained);
    }

    pub fn resolve(&self, key: QueueKey) -> Option<SlotId> {
        self.state.lock().registry.resolve(key)
    }

    pub fn stats(&self, id: SlotId) -> Result<QueueStats> {
        let state = self.state.lock();
        let queue = state.registry.active(id)?;
        Ok(QueueStats {
            key: queue.key,
            used: queue.arena.used(),
            capacity: queue.arena.capacity(),
            refcount: queue.refcount,
            records: queue.arena.len()?,
        })
    }

    pub fn membership(&self, pid: Pid) -> SlotMask {
        self.state.lock().membership.mask(pid)
    }

    pub fn active_queues(&self) -> usize {
        self.state.lock().registry.active_count()
    }

    pub fn blocked_senders(&self) -> usize {
        self.state.lock().senders.len()
    }

    pub fn blocked_receivers(&self) -> usize {
        self.state.lock().receivers.len()
    }

    /// Zeroed copy-out buffer for a receive on `id`. The slot is checked
    /// first, and no buffer may exceed the largest payload the arena holds.
    fn receive_buffer(&self, id: SlotId, buffer_size: usize) -> Result<Vec<u8>> {
        let limit = self.state.lock().registry.active(id)?.arena.max_payload();
        if buffer_size > limit {
            return Err(MqError::MessageTooLarge { len: buffer_size, limit });
        }
        Ok(vec![0u8; buffer_size])
    }

    fn wake_all(&self, queue: &mut WaitQueue) {
        for pid in queue.drain() {
            self.blocker.wakeup(pid);
        }
    }

    /// Parks `pid` and suspends it; returns with the lock held again.
    fn block(
        &self,
        state: &mut MutexGuard<'_, MqState>,
        direction: Direction,
        pid: Pid,
        id: SlotId,
    ) -> Result<()> {
        match state.waiters(direction).park(pid) {
            ParkOutcome::Parked | ParkOutcome::AlreadyParked => {}
            ParkOutcome::Rejected { capacity } => {
                log::warn!("mq: {} pid={} cannot wait, {} waiters already parked", direction, pid, capacity);
                return Err(MqError::WaitQueueFull);
            }
        }
        log::debug!("mq: {} pid={} blocked on slot {}", direction, pid, id);
        self.blocker.sleep(pid, state);
        Ok(())
    }

    fn release_slot(&self, state: &mut MqState, id: SlotId) {
        match state.registry.release(id, &self.pages) {
            Ok(true) => {
                state.membership.forget_slot(id);
                self.wake_all(&mut state.senders);
                self.wake_all(&mut state.receivers);
            }
            Ok(false) => {}
            Err(err) => log::warn!("mq: release of slot {} failed: {}", id, err),
        }
    }
}
