// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Subsystem configuration, loadable from TOML.

use serde::{Deserialize, Serialize};

use crate::arena::MIN_ARENA_SIZE;
use crate::error::{MqError, Result};
use crate::membership::MAX_SLOTS;

pub const DEFAULT_SLOTS: usize = 16;
pub const DEFAULT_MAX_PROCESSES: usize = 64;
pub const DEFAULT_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqConfig {
    /// Registry size; bounded by the membership mask width.
    pub slots: usize,
    /// Wait-queue capacity, i.e. the number of schedulable processes.
    pub max_processes: usize,
    /// Arena size handed out by the page allocator.
    pub page_size: usize,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            slots: DEFAULT_SLOTS,
            max_processes: DEFAULT_MAX_PROCESSES,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MqConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|err| MqError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.slots == 0 || self.slots > MAX_SLOTS {
            return Err(MqError::Config(format!(
                "slots must be within 1..={MAX_SLOTS}, got {}",
                self.slots
            )));
        }
        if self.max_processes == 0 {
            return Err(MqError::Config("max_processes must be at least 1".into()));
        }
        if self.page_size < MIN_ARENA_SIZE || self.page_size > u32::MAX as usize {
            return Err(MqError::Config(format!(
                "page_size must be within {MIN_ARENA_SIZE}..={}, got {}",
                u32::MAX,
                self.page_size
            )));
        }
        Ok(())
    }
}
