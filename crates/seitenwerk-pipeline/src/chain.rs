// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chain builder — composes per-page stage chains.
//
// A chain is a singly-linked sequence of nodes rooted at stage 0.  Each link
// owns its downstream continuation exclusively, so a chain is built from the
// terminal stage downward and then run from stage 0 upward.  Chains are
// single-use: a chain is built for one task, run once and dropped.

use seitenwerk_core::error::{Result, SeitenwerkError};
use seitenwerk_core::types::PageId;
use tracing::{debug, instrument};

use crate::stage::{ExecuteNode, Payload, ProbeNode, ProbeVerdict, StageFailure, StageRegistry};

// ---------------------------------------------------------------------------
// Execute chains
// ---------------------------------------------------------------------------

struct ExecuteLink {
    stage: usize,
    node: Box<dyn ExecuteNode>,
    downstream: Option<Box<ExecuteLink>>,
}

/// How a run of an [`ExecuteChain`] ended.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every stage ran; `stage` is the terminal stage.
    Completed { stage: usize, payload: Payload },
    /// `stage` reported a failure; later stages did not run.
    Failed { stage: usize, failure: StageFailure },
    /// Interrupted at the boundary before `stage`.
    Interrupted { stage: usize },
}

/// Real-work chain for one page.
pub struct ExecuteChain {
    page: PageId,
    terminal: usize,
    head: Box<ExecuteLink>,
}

impl ExecuteChain {
    pub fn page(&self) -> &PageId {
        &self.page
    }

    pub fn terminal(&self) -> usize {
        self.terminal
    }

    /// Stage indices in run order.
    pub fn stages(&self) -> Vec<usize> {
        let mut stages = Vec::new();
        let mut link = Some(&*self.head);
        while let Some(current) = link {
            stages.push(current.stage);
            link = current.downstream.as_deref();
        }
        stages
    }

    /// Run the chain, checking `interrupted` at every stage boundary.  A
    /// stage that has started always runs to completion.
    pub fn run(self, interrupted: impl Fn() -> bool) -> ChainOutcome {
        let mut link = Some(self.head);
        let mut data = Payload::empty();
        let mut last = 0;

        while let Some(current) = link {
            let ExecuteLink {
                stage,
                mut node,
                downstream,
            } = *current;

            if interrupted() {
                debug!(page = %self.page, stage, "chain interrupted at stage boundary");
                return ChainOutcome::Interrupted { stage };
            }

            match node.execute(data) {
                Ok(output) => {
                    data = output;
                    last = stage;
                    link = downstream;
                }
                Err(failure) => {
                    debug!(page = %self.page, stage, %failure, "stage reported failure");
                    return ChainOutcome::Failed { stage, failure };
                }
            }
        }

        ChainOutcome::Completed {
            stage: last,
            payload: data,
        }
    }
}

impl std::fmt::Debug for ExecuteChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteChain")
            .field("page", &self.page)
            .field("stages", &self.stages())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Probe chains
// ---------------------------------------------------------------------------

struct ProbeLink {
    stage: usize,
    node: Box<dyn ProbeNode>,
    downstream: Option<Box<ProbeLink>>,
}

/// Per-stage cache verdicts from one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    verdicts: Vec<(usize, ProbeVerdict)>,
}

impl ProbeReport {
    /// `(stage, verdict)` in stage order.
    pub fn verdicts(&self) -> &[(usize, ProbeVerdict)] {
        &self.verdicts
    }

    pub fn verdict(&self, stage: usize) -> Option<ProbeVerdict> {
        self.verdicts
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, v)| *v)
    }

    /// Lowest stage whose cached output cannot be used.
    pub fn first_invalid(&self) -> Option<usize> {
        self.verdicts
            .iter()
            .find(|(_, v)| !v.is_valid())
            .map(|(s, _)| *s)
    }

    pub fn is_valid(&self) -> bool {
        self.first_invalid().is_none()
    }
}

/// Read-only cache-validity chain.  Not bound to a page: the page is given
/// per run, and running it never mutates anything.
pub struct ProbeChain {
    terminal: usize,
    head: Box<ProbeLink>,
}

impl ProbeChain {
    pub fn terminal(&self) -> usize {
        self.terminal
    }

    /// Probe every stage from 0 up.  Once a stage is not valid, everything
    /// downstream of it depends on stale input and is reported `Stale`
    /// without being probed.
    pub fn run(&self, page: &PageId) -> ProbeReport {
        let mut verdicts = Vec::new();
        let mut upstream_valid = true;
        let mut link = Some(&*self.head);

        while let Some(current) = link {
            let verdict = if upstream_valid {
                current.node.probe(page)
            } else {
                ProbeVerdict::Stale
            };
            upstream_valid &= verdict.is_valid();
            verdicts.push((current.stage, verdict));
            link = current.downstream.as_deref();
        }

        ProbeReport { verdicts }
    }
}

impl std::fmt::Debug for ProbeChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeChain")
            .field("terminal", &self.terminal)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builds execute and probe chains over one stage registry.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    registry: StageRegistry,
}

impl ChainBuilder {
    pub fn new(registry: StageRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Build an execute chain for `page` covering stages `0..=terminal`.
    ///
    /// Debug instrumentation goes to the terminal stage only, and never to
    /// batch chains.
    #[instrument(skip(self, page, debug_flag), fields(page = %page, debug = debug_flag))]
    pub fn build_execute(
        &self,
        page: &PageId,
        terminal: usize,
        batch: bool,
        debug_flag: bool,
    ) -> Result<ExecuteChain> {
        self.registry.check(terminal)?;

        let mut debug = debug_flag && !batch;
        let mut downstream: Option<Box<ExecuteLink>> = None;

        for (stage, factory) in self.registry.iter().enumerate().take(terminal + 1).rev() {
            let node = factory.create_execute_node(page, batch, debug);
            debug = false;
            downstream = Some(Box::new(ExecuteLink {
                stage,
                node,
                downstream,
            }));
        }

        // `check` guarantees stage 0 exists, so the loop ran at least once.
        let head = downstream.ok_or(SeitenwerkError::EmptyRegistry)?;
        debug!(terminal, "execute chain built");
        Ok(ExecuteChain {
            page: page.clone(),
            terminal,
            head,
        })
    }

    /// Build a probe chain covering stages `0..=terminal`.
    pub fn build_probe(&self, terminal: usize) -> Result<ProbeChain> {
        self.registry.check(terminal)?;

        let mut downstream: Option<Box<ProbeLink>> = None;
        for (stage, factory) in self.registry.iter().enumerate().take(terminal + 1).rev() {
            downstream = Some(Box::new(ProbeLink {
                stage,
                node: factory.create_probe_node(),
                downstream,
            }));
        }

        let head = downstream.ok_or(SeitenwerkError::EmptyRegistry)?;
        Ok(ProbeChain { terminal, head })
    }
}
