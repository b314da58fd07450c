// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Seitenwerk.
//
// Per-page stage failures are not represented here: they travel inside a
// task result so that one unreadable page never stops the rest of a run.

use thiserror::Error;

use crate::types::PageId;

/// Top-level error type for all Seitenwerk operations.
#[derive(Debug, Error)]
pub enum SeitenwerkError {
    // -- Configuration errors --
    #[error("invalid terminal stage {index}: pipeline has {count} stage(s)")]
    InvalidStage { index: usize, count: usize },

    #[error("stage registry is empty")]
    EmptyRegistry,

    #[error("invalid configuration: {0}")]
    Config(String),

    // -- Queue errors --
    #[error("page {0} already has pending or in-flight work")]
    AlreadyQueued(PageId),

    #[error("page {0} is not part of the page sequence")]
    UnknownPage(PageId),

    // -- Scheduling errors --
    #[error("batch processing is in progress")]
    BatchInProgress,

    #[error("worker pool has been shut down")]
    PoolShutDown,

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    // -- Storage / persistence --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SeitenwerkError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageId, SubPage};

    #[test]
    fn invalid_stage_message_names_bounds() {
        let err = SeitenwerkError::InvalidStage { index: 7, count: 6 };
        assert_eq!(
            err.to_string(),
            "invalid terminal stage 7: pipeline has 6 stage(s)"
        );
    }

    #[test]
    fn already_queued_message_names_page() {
        let page = PageId::new(ImageId::new("scan-001.tif", 0), SubPage::Left);
        let err = SeitenwerkError::AlreadyQueued(page);
        assert_eq!(
            err.to_string(),
            "page scan-001.tif#0/left already has pending or in-flight work"
        );
    }
}
