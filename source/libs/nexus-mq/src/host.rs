// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Collaborator seams of the queue subsystem and their host backends
//!
//! OWNERS: @kernel-ipc-team
//!
//! PUBLIC API:
//!   - trait Blocker: suspend the caller while releasing the global lock; wake a process
//!   - trait PageAllocator: alloc_page/free_page of one fixed-size block
//!   - struct CondvarBlocker: parking_lot::Condvar backed Blocker
//!   - struct HeapPages: heap backed PageAllocator with an optional page limit
//!
//! INVARIANTS:
//!   - Blocker::sleep returns with the global lock re-acquired
//!   - Blocker::wakeup is only called with the global lock held, so a wake can
//!     never slip between a caller parking and suspending
//!   - Every page handed out by alloc_page is returned through free_page
//!
//! DEPENDENCIES:
//!   - parking_lot::{Condvar, Mutex}: host suspension primitive

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::queue::MqState;
use crate::Pid;

/// Suspend/wake primitive provided by the process layer.
pub trait Blocker: Send + Sync {
    /// Suspends `pid`, releasing `guard` while asleep and re-acquiring it
    /// before returning. May return spuriously.
    fn sleep(&self, pid: Pid, guard: &mut MutexGuard<'_, MqState>);

    /// Makes `pid` runnable again.
    fn wakeup(&self, pid: Pid);
}

/// One fixed-size block handed out by a [`PageAllocator`].
#[derive(Debug)]
pub struct Page(Box<[u8]>);

impl Page {
    /// Allocates a zero-filled page of `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        Self(vec![0u8; len].into_boxed_slice())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// Page-granularity allocator backing queue arenas.
pub trait PageAllocator: Send + Sync {
    /// Returns one page or `None` when memory is exhausted.
    fn alloc_page(&self) -> Option<Page>;

    /// Returns a page obtained from [`PageAllocator::alloc_page`].
    fn free_page(&self, page: Page);
}

/// Heap-backed page allocator for host builds and tests.
pub struct HeapPages {
    page_size: usize,
    limit: Option<usize>,
    outstanding: AtomicUsize,
}

impl HeapPages {
    /// Unlimited allocator producing pages of `page_size` bytes.
    pub const fn new(page_size: usize) -> Self {
        Self { page_size, limit: None, outstanding: AtomicUsize::new(0) }
    }

    /// Allocator that fails once `max_pages` pages are outstanding.
    pub const fn with_limit(page_size: usize, max_pages: usize) -> Self {
        Self { page_size, limit: Some(max_pages), outstanding: AtomicUsize::new(0) }
    }

    /// Pages currently handed out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl PageAllocator for HeapPages {
    fn alloc_page(&self) -> Option<Page> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count < limit {
                    Some(count + 1)
                } else {
                    None
                }
            })
            .ok()?;
        Some(Page::zeroed(self.page_size))
    }

    fn free_page(&self, page: Page) {
        drop(page);
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Condition-variable backed [`Blocker`].
///
/// A wake is recorded as a pending token for the target pid; a sleeper only
/// returns once it consumes its own token, so notifications meant for other
/// processes just send it back to sleep.
#[derive(Default)]
pub struct CondvarBlocker {
    condvar: Condvar,
    pending: Mutex<BTreeSet<Pid>>,
}

impl CondvarBlocker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Blocker for CondvarBlocker {
    fn sleep(&self, pid: Pid, guard: &mut MutexGuard<'_, MqState>) {
        loop {
            if self.pending.lock().remove(&pid) {
                return;
            }
            self.condvar.wait(guard);
        }
    }

    fn wakeup(&self, pid: Pid) {
        self.pending.lock().insert(pid);
        self.condvar.notify_all();
    }
}
