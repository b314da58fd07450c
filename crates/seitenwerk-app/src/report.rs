// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Headless display sink: logs each page as it lands and keeps a tally for the
// end-of-run summary.

use std::path::PathBuf;

use seitenwerk_core::types::PageId;
use seitenwerk_pipeline::{DisplaySink, TaskResult};
use tracing::{info, warn};

use crate::stages::{STAGE_NAMES, WrittenPage};

/// A page that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page: PageId,
    pub stage: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    /// Pages that finished at a stage short of output.
    pub completed: Vec<PageId>,
    pub failed: Vec<PageFailure>,
    pub batch_finished: bool,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.written.len() + self.completed.len() + self.failed.len()
    }
}

fn stage_name(stage: usize) -> &'static str {
    STAGE_NAMES.get(stage).copied().unwrap_or("unknown")
}

impl DisplaySink for BatchReport {
    fn on_result(&mut self, result: &TaskResult, display_stage: usize) {
        if let Some(failure) = result.failure() {
            warn!(
                page = %result.page,
                stage = stage_name(display_stage),
                %failure,
                "page failed"
            );
            self.failed.push(PageFailure {
                page: result.page.clone(),
                stage: display_stage,
                message: failure.message.clone(),
            });
            return;
        }

        match result.payload().and_then(|p| p.downcast_ref::<WrittenPage>()) {
            Some(written) => {
                info!(
                    page = %result.page,
                    path = %written.path.display(),
                    width = written.width,
                    height = written.height,
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "page written"
                );
                self.written.push(written.path.clone());
            }
            None => {
                info!(page = %result.page, stage = stage_name(display_stage), "page processed");
                self.completed.push(result.page.clone());
            }
        }
    }

    fn on_batch_finished(&mut self) {
        info!(processed = self.processed(), "batch finished");
        self.batch_finished = true;
    }

    fn on_selection_changed(&mut self, page: &PageId) {
        tracing::debug!(page = %page, "now processing");
    }
}
