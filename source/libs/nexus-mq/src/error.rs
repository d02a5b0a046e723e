// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the queue subsystem.

use thiserror::Error;

/// Result type returned by queue operations.
pub type Result<T> = core::result::Result<T, MqError>;

/// Errors produced by the queue subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqError {
    /// Slot index out of range or slot not active.
    #[error("invalid queue id")]
    InvalidId,
    /// No free slot is left in the registry.
    #[error("queue registry exhausted")]
    ResourceExhausted,
    /// The page allocator could not supply an arena.
    #[error("arena page allocation failed")]
    AllocationFailed,
    /// Payload can never fit into an empty arena.
    #[error("message of {len} bytes exceeds arena limit of {limit} bytes")]
    MessageTooLarge { len: usize, limit: usize },
    /// Non-blocking attempt could not make progress.
    #[error("operation would block")]
    WouldBlock,
    /// The slot was destroyed while the caller was blocked on it.
    #[error("queue removed while caller was blocked")]
    QueueRemoved,
    /// More distinct processes tried to block than the wait queue holds.
    #[error("wait queue full")]
    WaitQueueFull,
    /// A record header pointed outside the arena.
    #[error("corrupt arena record at offset {offset}")]
    CorruptArena { offset: usize },
    /// Configuration rejected by validation or parsing.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MqError {
    /// Stable negative code for the syscall-dispatch layer.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidId => -1,
            Self::ResourceExhausted => -2,
            Self::AllocationFailed => -3,
            Self::MessageTooLarge { .. } => -4,
            Self::WouldBlock => -5,
            Self::QueueRemoved => -6,
            Self::WaitQueueFull => -7,
            Self::CorruptArena { .. } => -8,
            Self::Config(_) => -9,
        }
    }
}
