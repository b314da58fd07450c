// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Stage contracts and the stage registry.
//
// A stage is one phase of the page pipeline (orientation fix, page split,
// deskew, content selection, layout, output).  The scheduler never looks
// inside a stage: it only asks the stage for an execute node or a probe node
// and wires those nodes into chains.

use std::any::Any;
use std::sync::Arc;

use seitenwerk_core::error::{Result, SeitenwerkError};
use seitenwerk_core::types::PageId;
use thiserror::Error;

/// Opaque data handed from one stage's node to the next, and finally to the
/// display layer.
pub struct Payload(Box<dyn Any + Send>);

impl Payload {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Box::new(value))
    }

    /// The input of the first stage, and the payload of a failed result.
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is::<()>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Take the value out, or get the payload back if the type is wrong.
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Self> {
        self.0.downcast::<T>().map(|b| *b).map_err(Self)
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Payload(empty)")
        } else {
            f.write_str("Payload(..)")
        }
    }
}

/// A stage could not process a page (unreadable image, degenerate content).
///
/// Local to the page: the run carries on with the next one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageFailure {
    pub message: String,
}

impl StageFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One stage's real work for one page.
pub trait ExecuteNode: Send {
    /// Transform the upstream stage's output.  Stage 0 receives
    /// [`Payload::empty`].
    fn execute(&mut self, input: Payload) -> std::result::Result<Payload, StageFailure>;
}

/// Whether a stage's cached output can still be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Cached output matches the current parameters.
    Valid,
    /// Cached output exists but was produced from different inputs.
    Stale,
    /// Nothing cached yet.
    Missing,
}

impl ProbeVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// One stage's read-only cache check.  Must not mutate anything: running it
/// twice on the same inputs gives the same verdict.
pub trait ProbeNode: Send + Sync {
    fn probe(&self, page: &PageId) -> ProbeVerdict;
}

/// A pipeline phase as seen by the scheduler.
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Seed per-page parameters before the page is queued.
    fn load_default_settings(&self, _page: &PageId) {}

    /// Create this stage's execute node for `page`.
    fn create_execute_node(&self, page: &PageId, batch: bool, debug: bool) -> Box<dyn ExecuteNode>;

    /// Create this stage's probe node.  Must not touch the stage's mutable
    /// caches.
    fn create_probe_node(&self) -> Box<dyn ProbeNode>;
}

/// The ordered, fixed list of stages for a session.
#[derive(Clone)]
pub struct StageRegistry {
    stages: Vec<Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Result<Self> {
        if stages.is_empty() {
            return Err(SeitenwerkError::EmptyRegistry);
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Stage>> {
        self.stages.get(index)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<dyn Stage>> + ExactSizeIterator {
        self.stages.iter()
    }

    /// Index of the stage called `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name() == name)
    }

    /// Fail with [`SeitenwerkError::InvalidStage`] unless `index` names a stage.
    pub fn check(&self, index: usize) -> Result<()> {
        if index < self.stages.len() {
            Ok(())
        } else {
            Err(SeitenwerkError::InvalidStage {
                index,
                count: self.stages.len(),
            })
        }
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|s| s.name()))
            .finish()
    }
}
