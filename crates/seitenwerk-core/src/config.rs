// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scheduler configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SeitenwerkError};

/// Read-only inputs supplied when the controller is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. `0` means one per available CPU.
    pub worker_threads: usize,
    /// Attach debug instrumentation to the highest stage of interactive chains.
    pub debug: bool,
    /// Stage index chains are built up to when the session starts.
    pub terminal_stage: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 0,
            debug: false,
            terminal_stage: 0,
        }
    }
}

impl SchedulerConfig {
    /// Worker count with `0` resolved to the hardware concurrency.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Check the configuration against a pipeline of `stage_count` stages.
    pub fn validate(&self, stage_count: usize) -> Result<()> {
        if stage_count == 0 {
            return Err(SeitenwerkError::EmptyRegistry);
        }
        if self.terminal_stage >= stage_count {
            return Err(SeitenwerkError::InvalidStage {
                index: self.terminal_stage,
                count: stage_count,
            });
        }
        Ok(())
    }
}
