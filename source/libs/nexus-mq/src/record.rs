// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Packed record header stored in front of every arena payload.

use core::mem::size_of;

use crate::MessageType;

/// Size in bytes of a serialised [`RecordHeader`].
pub const HEADER_SIZE: usize = size_of::<RecordHeader>();

static_assertions::const_assert_eq!(HEADER_SIZE, 16);

/// Header of one record inside an arena.
///
/// Serialised as four little-endian words: `ty`, `next`, `payload`, `size`.
/// `next` is the arena offset of the following record; offset 0 always holds
/// the sentinel, so `next == 0` marks the tail.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub ty: MessageType,
    pub next: u32,
    pub payload: u32,
    pub size: u32,
}

impl RecordHeader {
    /// Header of the sentinel record at offset 0.
    pub const SENTINEL: Self = Self { ty: 0, next: 0, payload: HEADER_SIZE as u32, size: 0 };

    /// Creates a tail header for a record stored at `offset`.
    pub const fn new(ty: MessageType, offset: u32, size: u32) -> Self {
        Self { ty, next: 0, payload: offset + HEADER_SIZE as u32, size }
    }

    /// Header plus payload length in bytes.
    #[inline]
    pub const fn span(&self) -> usize {
        HEADER_SIZE + self.size as usize
    }

    /// Offset of the following record, if any.
    #[inline]
    pub const fn next_offset(&self) -> Option<usize> {
        if self.next == 0 {
            None
        } else {
            Some(self.next as usize)
        }
    }

    pub fn to_le_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.ty.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.next.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.payload.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn from_le_bytes(bytes: [u8; HEADER_SIZE]) -> Self {
        let word = |at: usize| -> [u8; 4] {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[at..at + 4]);
            raw
        };
        Self {
            ty: i32::from_le_bytes(word(0)),
            next: u32::from_le_bytes(word(4)),
            payload: u32::from_le_bytes(word(8)),
            size: u32::from_le_bytes(word(12)),
        }
    }

    /// Decodes a header from the start of `raw`, if it is long enough.
    pub fn read(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; HEADER_SIZE] = raw.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self::from_le_bytes(bytes))
    }
}
