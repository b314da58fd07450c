// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tasks, cancellation flags and task results.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use seitenwerk_core::types::{PageId, TaskId, TaskMode};

use crate::chain::{ChainOutcome, ExecuteChain, ProbeChain, ProbeReport};
use crate::stage::{Payload, StageFailure};

/// Cooperative cancellation flag shared by a task and its queue entry.
///
/// Monotonic: once set it is never cleared.  Workers only look at it at stage
/// boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The work a task carries.
#[derive(Debug)]
pub enum Chain {
    Execute(ExecuteChain),
    Probe(ProbeChain),
}

impl Chain {
    pub fn terminal(&self) -> usize {
        match self {
            Self::Execute(chain) => chain.terminal(),
            Self::Probe(chain) => chain.terminal(),
        }
    }
}

/// One scheduled unit: a page, its chain, mode flags and cancel flag.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    page: PageId,
    mode: TaskMode,
    debug: bool,
    chain: Chain,
    cancel: CancelFlag,
}

impl Task {
    pub fn new(page: PageId, mode: TaskMode, debug: bool, chain: Chain) -> Self {
        Self {
            id: TaskId::new(),
            page,
            mode,
            debug,
            chain,
            cancel: CancelFlag::new(),
        }
    }

    /// Wrap an execute chain; the page comes from the chain.
    pub fn execute(chain: ExecuteChain, mode: TaskMode, debug: bool) -> Self {
        let page = chain.page().clone();
        Self::new(page, mode, debug, Chain::Execute(chain))
    }

    pub fn probe(page: PageId, chain: ProbeChain, mode: TaskMode) -> Self {
        Self::new(page, mode, false, Chain::Probe(chain))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn page(&self) -> &PageId {
        &self.page
    }

    pub fn mode(&self) -> TaskMode {
        self.mode
    }

    pub fn is_batch(&self) -> bool {
        self.mode == TaskMode::Batch
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn terminal_stage(&self) -> usize {
        self.chain.terminal()
    }

    /// A handle on this task's cancel flag.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run the chain on the current thread.  `halt` is the pool-wide stop
    /// signal; like the cancel flag it is only consulted between stages.
    pub(crate) fn run(self, halt: &AtomicBool) -> TaskResult {
        let started = Instant::now();
        let Task {
            id,
            page,
            mode,
            chain,
            cancel,
            ..
        } = self;
        let interrupted = || cancel.is_cancelled() || halt.load(Ordering::Acquire);

        let (stage, outcome) = match chain {
            Chain::Execute(chain) => match chain.run(&interrupted) {
                ChainOutcome::Completed { stage, payload } => (stage, Outcome::Completed(payload)),
                ChainOutcome::Failed { stage, failure } => (stage, Outcome::Failed(failure)),
                ChainOutcome::Interrupted { stage } => (stage, Outcome::Cancelled),
            },
            Chain::Probe(chain) => {
                if interrupted() {
                    (chain.terminal(), Outcome::Cancelled)
                } else {
                    (chain.terminal(), Outcome::Probed(chain.run(&page)))
                }
            }
        };

        TaskResult {
            task_id: id,
            page,
            mode,
            stage,
            outcome,
            elapsed: started.elapsed(),
        }
    }

    /// Report the task as cancelled without running any stage.
    pub(crate) fn into_cancelled_result(self) -> TaskResult {
        self.cancel.cancel();
        TaskResult {
            task_id: self.id,
            stage: 0,
            page: self.page,
            mode: self.mode,
            outcome: Outcome::Cancelled,
            elapsed: Duration::ZERO,
        }
    }
}

/// What a finished task produced.
#[derive(Debug)]
pub enum Outcome {
    /// Every stage of an execute chain ran.
    Completed(Payload),
    /// A probe chain ran.
    Probed(ProbeReport),
    /// A stage could not process the page.  Carries no payload.
    Failed(StageFailure),
    /// The task stopped at a stage boundary, or never started.
    Cancelled,
}

/// Immutable report posted by a worker to the controller.
#[derive(Debug)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub page: PageId,
    pub mode: TaskMode,
    /// Stage that produced the outcome: the terminal stage on success, the
    /// failing stage on failure.
    pub stage: usize,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Completed(_) | Outcome::Probed(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, Outcome::Cancelled)
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.outcome {
            Outcome::Completed(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainBuilder;
    use crate::test_support::{StageLog, Trace, page, registry, registry_with};

    fn execute_task(builder: &ChainBuilder, name: &str, terminal: usize) -> Task {
        let chain = builder
            .build_execute(&page(name), terminal, false, false)
            .expect("build");
        Task::execute(chain, TaskMode::Interactive, false)
    }

    #[test]
    fn cancel_flag_is_shared_and_sticky() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn successful_run_reports_terminal_stage() {
        let log = StageLog::default();
        let builder = ChainBuilder::new(registry(&log, 4));
        let task = execute_task(&builder, "a", 2);
        let id = task.id();

        let result = task.run(&AtomicBool::new(false));
        assert_eq!(result.task_id, id);
        assert_eq!(result.stage, 2);
        assert!(result.is_success());
        let trace = result.payload().and_then(|p| p.downcast_ref::<Trace>());
        assert_eq!(trace, Some(&Trace(vec![0, 1, 2])));
    }

    #[test]
    fn failure_carries_failing_stage_and_no_payload() {
        let log = StageLog::default();
        let reg = registry_with(&log, 4, |i, stage| {
            if i == 3 { stage.failing_on(page("x")) } else { stage }
        });
        let task = execute_task(&ChainBuilder::new(reg), "x", 3);

        let result = task.run(&AtomicBool::new(false));
        assert_eq!(result.stage, 3);
        assert!(result.is_failure());
        assert!(result.payload().is_none());
    }

    #[test]
    fn cancelled_before_start_runs_nothing() {
        let log = StageLog::default();
        let builder = ChainBuilder::new(registry(&log, 3));
        let task = execute_task(&builder, "a", 2);
        task.cancel();

        let result = task.run(&AtomicBool::new(false));
        assert!(result.is_cancelled());
        assert!(log.executed().is_empty());
    }

    #[test]
    fn halt_signal_stops_at_boundary() {
        let log = StageLog::default();
        let builder = ChainBuilder::new(registry(&log, 3));
        let task = execute_task(&builder, "a", 2);

        let result = task.run(&AtomicBool::new(true));
        assert!(result.is_cancelled());
        assert!(log.executed().is_empty());
    }

    #[test]
    fn probe_task_reports_verdicts() {
        let log = StageLog::default();
        let builder = ChainBuilder::new(registry(&log, 3));
        let chain = builder.build_probe(2).expect("build");
        let task = Task::probe(page("a"), chain, TaskMode::Interactive);

        let result = task.run(&AtomicBool::new(false));
        assert_eq!(result.stage, 2);
        match result.outcome {
            Outcome::Probed(report) => assert!(report.is_valid()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn into_cancelled_result_sets_flag() {
        let log = StageLog::default();
        let builder = ChainBuilder::new(registry(&log, 1));
        let task = execute_task(&builder, "a", 0);
        let flag = task.cancel_flag();

        let result = task.into_cancelled_result();
        assert!(result.is_cancelled());
        assert!(flag.is_cancelled());
    }

    #[test]
    fn debug_flag_is_kept_for_execute_only() {
        let log = StageLog::default();
        let builder = ChainBuilder::new(registry(&log, 2));
        let chain = builder
            .build_execute(&page("a"), 1, false, true)
            .expect("build");
        assert!(Task::execute(chain, TaskMode::Interactive, true).is_debug());
        assert!(!execute_task(&builder, "a", 1).is_debug());

        let probe = builder.build_probe(1).expect("build");
        assert!(!Task::probe(page("a"), probe, TaskMode::Interactive).is_debug());
    }
}
