// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Seitenwerk Pipeline — the scheduling core.  Builds per-page stage chains,
// keeps them in page-ordered processing queues, runs them on a bounded pool
// of worker threads and routes the results back to a single controller.
// What each stage computes lives outside this crate, behind the `Stage`
// trait.

pub mod chain;
pub mod controller;
pub mod pool;
pub mod queue;
pub mod stage;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use chain::{ChainBuilder, ChainOutcome, ExecuteChain, ProbeChain, ProbeReport};
pub use controller::{Controller, DisplaySink, Mode};
pub use pool::WorkerPool;
pub use queue::{EntryStatus, FinishOutcome, ProcessingQueue};
pub use stage::{ExecuteNode, Payload, ProbeNode, ProbeVerdict, Stage, StageFailure, StageRegistry};
pub use task::{CancelFlag, Chain, Outcome, Task, TaskResult};
