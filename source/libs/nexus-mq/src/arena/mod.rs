// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-size record arena owned by one queue slot
//! OWNERS: @kernel-ipc-team
//! PUBLIC API: Arena (append/find/take/compact), RecordRef, Cursor
//! DEPENDS_ON: record::RecordHeader, host::Page
//! INVARIANTS: Sentinel at offset 0; live records packed over [0, used) in link order;
//!             used <= capacity; every `next` is a bounds-checked offset, never a pointer

use crate::error::{MqError, Result};
use crate::host::Page;
use crate::record::{RecordHeader, HEADER_SIZE};
use crate::MessageType;

/// One live record located in an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef {
    pub offset: usize,
    pub header: RecordHeader,
}

/// Smallest page that can hold the sentinel and one record with a payload byte.
pub const MIN_ARENA_SIZE: usize = 2 * HEADER_SIZE + 1;

/// Packed, singly-linked sequence of records inside one page.
#[derive(Debug)]
pub struct Arena {
    page: Page,
    used: usize,
}

impl Arena {
    /// Formats `page` with an empty list. Pages too small or too large to be
    /// addressed with 32-bit offsets are handed back.
    pub fn new(mut page: Page) -> core::result::Result<Self, Page> {
        if page.len() < MIN_ARENA_SIZE || page.len() > u32::MAX as usize {
            return Err(page);
        }
        page.bytes_mut().fill(0);
        let mut arena = Self { page, used: HEADER_SIZE };
        arena.write_header(0, RecordHeader::SENTINEL);
        Ok(arena)
    }

    /// Releases the backing page.
    pub fn into_page(self) -> Page {
        self.page
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.page.len()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Largest payload an empty arena accepts.
    #[inline]
    pub fn max_payload(&self) -> usize {
        self.capacity() - 2 * HEADER_SIZE
    }

    /// Whether a record with `len` payload bytes fits right now.
    #[inline]
    pub fn fits(&self, len: usize) -> bool {
        self.used
            .checked_add(HEADER_SIZE)
            .and_then(|need| need.checked_add(len))
            .is_some_and(|need| need <= self.capacity())
    }

    /// Iterates the records after the sentinel in link order.
    pub fn records(&self) -> Cursor<'_> {
        Cursor { arena: self, next: Some(0), skip_sentinel: true, budget: self.max_records() }
    }

    /// Number of live records, sentinel excluded.
    pub fn len(&self) -> Result<usize> {
        self.records().try_fold(0, |count, rec| rec.map(|_| count + 1))
    }

    pub fn is_empty(&self) -> bool {
        self.used == HEADER_SIZE
    }

    /// Payload bytes of `rec`.
    pub fn payload(&self, rec: &RecordRef) -> Result<&[u8]> {
        let start = rec.offset + HEADER_SIZE;
        self.page
            .bytes()
            .get(start..start + rec.header.size as usize)
            .ok_or(MqError::CorruptArena { offset: rec.offset })
    }

    /// Appends a record at the tail. Fails with `WouldBlock` if it does not fit.
    pub fn append(&mut self, ty: MessageType, payload: &[u8]) -> Result<usize> {
        if !self.fits(payload.len()) {
            return Err(MqError::WouldBlock);
        }
        let mut tail = RecordRef { offset: 0, header: self.header_at(0)? };
        while let Some(next) = tail.header.next_offset() {
            tail = RecordRef { offset: next, header: self.header_at(next)? };
        }
        let offset = tail.offset + tail.header.span();
        if offset != self.used {
            log::error!("mq: arena tail at {} but used is {}", offset, self.used);
            return Err(MqError::CorruptArena { offset });
        }

        let header = RecordHeader::new(ty, offset as u32, payload.len() as u32);
        self.write_header(offset, header);
        let start = offset + HEADER_SIZE;
        self.page.bytes_mut()[start..start + payload.len()].copy_from_slice(payload);
        tail.header.next = offset as u32;
        self.write_header(tail.offset, tail.header);
        self.used += header.span();
        Ok(offset)
    }

    /// Finds the first record tagged exactly `ty`, returning it with the
    /// offset of its predecessor.
    pub fn find(&self, ty: MessageType) -> Result<Option<(usize, RecordRef)>> {
        let mut prev = 0;
        for rec in self.records() {
            let rec = rec?;
            if rec.header.ty == ty {
                return Ok(Some((prev, rec)));
            }
            prev = rec.offset;
        }
        Ok(None)
    }

    /// Removes `rec` (linked after `prev`), copies up to `buf.len()` payload
    /// bytes into `buf` and compacts. Returns the full payload size.
    pub fn take(&mut self, prev: usize, rec: RecordRef, buf: &mut [u8]) -> Result<usize> {
        let payload = self.payload(&rec)?;
        let copied = payload.len().min(buf.len());
        buf[..copied].copy_from_slice(&payload[..copied]);

        let mut before = self.header_at(prev)?;
        if before.next as usize != rec.offset {
            return Err(MqError::CorruptArena { offset: prev });
        }
        before.next = rec.header.next;
        self.write_header(prev, before);
        self.used -= rec.header.span();
        self.compact()?;
        Ok(rec.header.size as usize)
    }

    /// Takes the first record tagged `ty`, if any.
    pub fn take_first(&mut self, ty: MessageType, buf: &mut [u8]) -> Result<Option<usize>> {
        match self.find(ty)? {
            Some((prev, rec)) => self.take(prev, rec, buf).map(Some),
            None => Ok(None),
        }
    }

    /// Slides every linked record toward offset 0 so the list is gap-free again,
    /// rewriting each `next` to the record's new position.
    pub fn compact(&mut self) -> Result<()> {
        let mut write = 0usize;
        let mut cursor = Some(0usize);
        let mut budget = self.max_records() + 1;
        while let Some(offset) = cursor {
            if budget == 0 {
                return Err(MqError::CorruptArena { offset });
            }
            budget -= 1;
            let header = self.header_at(offset)?;
            let span = header.span();
            if offset != write {
                self.page.bytes_mut().copy_within(offset..offset + span, write);
            }
            cursor = header.next_offset();
            let moved = RecordHeader {
                next: if cursor.is_some() { (write + span) as u32 } else { 0 },
                payload: (write + HEADER_SIZE) as u32,
                ..header
            };
            self.write_header(write, moved);
            write += span;
        }
        if write != self.used {
            log::error!("mq: compaction packed {} bytes but used is {}", write, self.used);
            return Err(MqError::CorruptArena { offset: write });
        }
        self.page.bytes_mut()[write..].fill(0);
        Ok(())
    }

    fn max_records(&self) -> usize {
        self.capacity() / HEADER_SIZE
    }

    fn header_at(&self, offset: usize) -> Result<RecordHeader> {
        let header = self
            .page
            .bytes()
            .get(offset..)
            .and_then(RecordHeader::read)
            .ok_or(MqError::CorruptArena { offset })?;
        if offset + header.span() > self.capacity() {
            return Err(MqError::CorruptArena { offset });
        }
        Ok(header)
    }

    fn write_header(&mut self, offset: usize, header: RecordHeader) {
        self.page.bytes_mut()[offset..offset + HEADER_SIZE].copy_from_slice(&header.to_le_bytes());
    }
}

/// Bounds-checked walk over an arena's linked records.
pub struct Cursor<'a> {
    arena: &'a Arena,
    next: Option<usize>,
    skip_sentinel: bool,
    budget: usize,
}

impl Iterator for Cursor<'_> {
    type Item = Result<RecordRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.next?;
            if self.budget == 0 {
                self.next = None;
                return Some(Err(MqError::CorruptArena { offset }));
            }
            self.budget -= 1;
            let header = match self.arena.header_at(offset) {
                Ok(header) => header,
                Err(err) => {
                    self.next = None;
                    return Some(Err(err));
                }
            };
            self.next = header.next_offset();
            if self.skip_sentinel {
                self.skip_sentinel = false;
                continue;
            }
            return Some(Ok(RecordRef { offset, header }));
        }
    }
}


#[cfg(test)]
mod tests_prop;
