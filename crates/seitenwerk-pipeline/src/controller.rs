// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Controller — the single owner of scheduling state.
//
// The controller decides between interactive mode (one task following the
// user's focus) and batch mode (every page, unattended), keeps the worker
// pool topped up, and routes each worker result to the display layer.  All
// queue mutation happens here, on the controller's thread; workers only ever
// talk back through the result channel.

use std::collections::HashSet;

use seitenwerk_core::config::SchedulerConfig;
use seitenwerk_core::error::{Result, SeitenwerkError};
use seitenwerk_core::types::{PageId, PageSequence, TaskMode};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, info, instrument, warn};

use crate::chain::{ChainBuilder, ProbeReport};
use crate::pool::WorkerPool;
use crate::queue::{FinishOutcome, ProcessingQueue};
use crate::stage::StageRegistry;
use crate::task::{Task, TaskResult};

/// The display layer, fed by the controller.
pub trait DisplaySink {
    /// A task finished and was not cancelled.  `display_stage` is the stage
    /// the page should be shown at: the terminal stage, or the earlier stage
    /// that reported a failure.
    fn on_result(&mut self, result: &TaskResult, display_stage: usize);

    /// Every page of a batch run has been processed.
    fn on_batch_finished(&mut self) {}

    /// The scheduler moved the selection (batch progress, page removal).
    fn on_selection_changed(&mut self, _page: &PageId) {}
}

/// Which kind of work the controller is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    Batch,
}

/// Scheduling state for one open project.
pub struct Controller<S: DisplaySink> {
    builder: ChainBuilder,
    pages: PageSequence,
    debug: bool,
    terminal_stage: usize,
    selection: Option<PageId>,
    interactive: ProcessingQueue,
    batch: Option<ProcessingQueue>,
    pool: WorkerPool,
    results: UnboundedReceiver<TaskResult>,
    /// Tasks submitted whose result has not been received yet.
    outstanding: usize,
    sink: S,
}

impl<S: DisplaySink> Controller<S> {
    /// Validate `config` against the registry and start the worker pool.
    /// The selection starts on the first page.
    pub fn new(
        registry: StageRegistry,
        pages: PageSequence,
        config: &SchedulerConfig,
        sink: S,
    ) -> Result<Self> {
        config.validate(registry.len())?;

        let (tx, results) = unbounded_channel();
        let pool = WorkerPool::new(config.resolved_worker_threads(), tx)?;

        info!(
            stages = registry.len(),
            pages = pages.len(),
            workers = pool.capacity(),
            terminal_stage = config.terminal_stage,
            "controller ready"
        );

        Ok(Self {
            builder: ChainBuilder::new(registry),
            selection: pages.first().cloned(),
            pages,
            debug: config.debug,
            terminal_stage: config.terminal_stage,
            interactive: ProcessingQueue::new(),
            batch: None,
            pool,
            results,
            outstanding: 0,
            sink,
        })
    }

    // -- Accessors ------------------------------------------------------------

    pub fn mode(&self) -> Mode {
        if self.batch.is_some() {
            Mode::Batch
        } else {
            Mode::Interactive
        }
    }

    pub fn is_batch_in_progress(&self) -> bool {
        self.batch.is_some()
    }

    pub fn terminal_stage(&self) -> usize {
        self.terminal_stage
    }

    pub fn selection(&self) -> Option<&PageId> {
        self.selection.as_ref()
    }

    pub fn pages(&self) -> &PageSequence {
        &self.pages
    }

    pub fn registry(&self) -> &StageRegistry {
        self.builder.registry()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn interactive_queue(&self) -> &ProcessingQueue {
        &self.interactive
    }

    pub fn batch_queue(&self) -> Option<&ProcessingQueue> {
        self.batch.as_ref()
    }

    /// Tasks submitted whose result has not been handled yet.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    // -- Interactive mode -----------------------------------------------------

    /// The user focused `page`.  Stops a running batch, cancels the previous
    /// interactive task and schedules a fresh chain for `page`.  The sink is
    /// not told about a selection the user made.
    #[instrument(skip(self, page), fields(page = %page))]
    pub fn select_page(&mut self, page: &PageId) -> Result<()> {
        if !self.pages.contains(page) {
            return Err(SeitenwerkError::UnknownPage(page.clone()));
        }
        if let Some(queue) = self.batch.take() {
            Self::cancel_batch(queue);
        }
        self.selection = Some(page.clone());
        self.load_interactive(page)
    }

    /// Reprocess the selected page.  Does nothing during batch processing.
    pub fn reload(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Ok(());
        }
        match self.selection.clone() {
            Some(page) => self.load_interactive(&page),
            None => Ok(()),
        }
    }

    /// Move the pipeline position.  Refused while a batch is running.
    pub fn set_terminal_stage(&mut self, stage: usize) -> Result<()> {
        if self.batch.is_some() {
            return Err(SeitenwerkError::BatchInProgress);
        }
        self.builder.registry().check(stage)?;
        if stage != self.terminal_stage {
            info!(from = self.terminal_stage, to = stage, "terminal stage changed");
            self.terminal_stage = stage;
        }
        self.reload()
    }

    fn load_interactive(&mut self, page: &PageId) -> Result<()> {
        self.interactive.cancel_all();
        self.load_default_settings(page);

        let chain = self
            .builder
            .build_execute(page, self.terminal_stage, false, self.debug)?;
        self.interactive
            .enqueue(Task::execute(chain, TaskMode::Interactive, self.debug))?;
        self.dispatch_interactive();
        Ok(())
    }

    fn dispatch_interactive(&mut self) {
        if !self.pool.has_spare_capacity() {
            debug!("no spare worker, interactive task waits");
            return;
        }
        if let Some(task) = self.interactive.take_next() {
            self.submit(task);
        }
    }

    // -- Batch mode -----------------------------------------------------------

    /// Queue every page, starting at the selection and wrapping forward, and
    /// fill the pool.  Returns the number of pages queued.
    #[instrument(skip(self))]
    pub fn start_batch(&mut self) -> Result<usize> {
        if self.batch.is_some() {
            return Err(SeitenwerkError::BatchInProgress);
        }

        self.interactive.cancel_all();

        let mut queue = ProcessingQueue::new();
        for page in self.pages.wrapped_from(self.selection.as_ref()) {
            self.load_default_settings(&page);
            let chain = self
                .builder
                .build_execute(&page, self.terminal_stage, true, self.debug)?;
            queue.enqueue(Task::execute(chain, TaskMode::Batch, false))?;
        }

        let count = queue.len();
        if count == 0 {
            info!("no pages to process");
            return Ok(0);
        }

        info!(count, terminal_stage = self.terminal_stage, "batch processing started");
        self.batch = Some(queue);
        self.fill_batch();
        self.follow_batch_selection();
        Ok(count)
    }

    /// Abort a running batch and go back to interactive mode on the page the
    /// batch was working on.
    pub fn stop_batch(&mut self) -> Result<()> {
        if self.batch.is_none() {
            return Ok(());
        }
        self.end_batch();
        self.reload()
    }

    fn end_batch(&mut self) {
        let Some(queue) = self.batch.take() else {
            return;
        };
        if let Some(page) = queue.selected_page().cloned() {
            self.move_selection(page);
        }
        Self::cancel_batch(queue);
    }

    fn cancel_batch(mut queue: ProcessingQueue) {
        let cancelled = queue.cancel_all();
        info!(cancelled, "batch processing stopped");
    }

    fn fill_batch(&mut self) {
        while self.pool.has_spare_capacity() {
            let Some(task) = self.batch.as_mut().and_then(|q| q.take_next()) else {
                break;
            };
            self.submit(task);
        }
    }

    fn follow_batch_selection(&mut self) {
        if let Some(page) = self
            .batch
            .as_ref()
            .and_then(|q| q.selected_page())
            .cloned()
        {
            self.move_selection(page);
        }
    }

    fn advance_batch(&mut self) {
        let Some(queue) = &self.batch else {
            return;
        };
        if queue.all_processed() {
            self.finish_batch();
        } else {
            self.fill_batch();
            self.follow_batch_selection();
        }
    }

    fn finish_batch(&mut self) {
        self.batch = None;
        info!("batch processing finished");
        self.sink.on_batch_finished();

        // Finished on the last page: wrap the selection to the first one.
        if self.selection.is_some() && self.selection.as_ref() == self.pages.last() {
            if let Some(first) = self.pages.first().cloned() {
                self.move_selection(first);
            }
        }

        // Back in interactive mode: show the selected page at the terminal stage.
        if let Err(e) = self.reload() {
            warn!(error = %e, "could not reload selection after batch");
        }
    }

    // -- Page removal ---------------------------------------------------------

    /// Drop `pages` from the project, cancelling any work queued for them.
    /// Returns how many pages were removed from the sequence.
    #[instrument(skip_all, fields(count = pages.len()))]
    pub fn remove_pages(&mut self, pages: &HashSet<PageId>) -> Result<usize> {
        self.interactive.cancel_matching(pages);
        if let Some(queue) = self.batch.as_mut() {
            queue.cancel_matching(pages);
        }

        let old_position = self
            .selection
            .as_ref()
            .and_then(|p| self.pages.position(p));
        let selection_removed = self.selection.as_ref().is_some_and(|p| pages.contains(p));
        let removed = self.pages.remove(pages);

        if selection_removed {
            let next = old_position
                .and_then(|pos| self.pages.get(pos.min(self.pages.len().saturating_sub(1))))
                .cloned();
            self.selection = None;
            if let Some(page) = next {
                self.move_selection(page);
            }
        }

        if self.batch.is_some() {
            self.advance_batch();
        } else if selection_removed {
            self.reload()?;
        }
        Ok(removed)
    }

    // -- Results --------------------------------------------------------------

    /// Route one worker result.  Returns whether it reached the display.
    pub fn handle_result(&mut self, result: TaskResult) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);

        let interactive = self.interactive.finish(result.task_id);
        let batch = self
            .batch
            .as_mut()
            .map_or(FinishOutcome::Unknown, |q| q.finish(result.task_id));
        let live = interactive == FinishOutcome::Finished || batch == FinishOutcome::Finished;

        let delivered = live && !result.is_cancelled();
        if delivered {
            self.deliver(&result);
        } else {
            debug!(page = %result.page, task_id = %result.task_id, "result discarded");
        }

        if self.batch.is_some() {
            self.advance_batch();
        } else {
            self.dispatch_interactive();
        }
        delivered
    }

    fn deliver(&mut self, result: &TaskResult) {
        if let Some(failure) = result.failure() {
            warn!(page = %result.page, stage = result.stage, %failure, "stage failed");
        }

        // First failing stage wins: the page is shown at the stage that
        // reported the problem.
        let display_stage = result.stage.min(self.terminal_stage);
        if display_stage < self.terminal_stage && self.batch.is_none() {
            info!(
                page = %result.page,
                from = self.terminal_stage,
                to = display_stage,
                "retargeting to failing stage"
            );
            self.terminal_stage = display_stage;
        }

        self.sink.on_result(result, display_stage);
    }

    /// Handle every result already waiting, without blocking.
    pub fn process_ready_results(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(result) = self.results.try_recv() {
            self.handle_result(result);
            handled += 1;
        }
        handled
    }

    /// Wait for the next result and handle it.  Returns `false` once nothing
    /// is outstanding.
    pub async fn process_next_result(&mut self) -> bool {
        if self.outstanding == 0 {
            return false;
        }
        match self.results.recv().await {
            Some(result) => {
                self.handle_result(result);
                true
            }
            None => false,
        }
    }

    /// Handle results until no submitted task is left.  In batch mode this
    /// runs the batch to completion, then the reload of the selection.
    pub async fn run_until_idle(&mut self) {
        while self.process_next_result().await {}
    }

    /// Handle results until the running batch has finished or was stopped.
    pub async fn run_batch(&mut self) {
        while self.batch.is_some() && self.process_next_result().await {}
    }

    // -- Probing ---------------------------------------------------------------

    /// Check cached outputs for `page` up to `terminal` without computing
    /// anything.
    pub fn probe_page(&self, page: &PageId, terminal: usize) -> Result<ProbeReport> {
        let chain = self.builder.build_probe(terminal)?;
        Ok(chain.run(page))
    }

    // -- Teardown ---------------------------------------------------------------

    /// Cancel everything, stop the workers and drop their final reports.
    pub fn shutdown(&mut self) {
        self.interactive.cancel_all();
        if let Some(mut queue) = self.batch.take() {
            queue.cancel_all();
        }
        self.pool.shutdown();

        while let Ok(result) = self.results.try_recv() {
            self.interactive.finish(result.task_id);
            self.outstanding = self.outstanding.saturating_sub(1);
        }
        info!(outstanding = self.outstanding, "controller shut down");
    }

    // -- Helpers ----------------------------------------------------------------

    fn submit(&mut self, task: Task) {
        let task_id = task.id();
        match self.pool.submit(task) {
            Ok(()) => self.outstanding += 1,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "could not submit task");
                self.interactive.finish(task_id);
                if let Some(queue) = self.batch.as_mut() {
                    queue.finish(task_id);
                }
            }
        }
    }

    fn load_default_settings(&self, page: &PageId) {
        for stage in self.builder.registry().iter() {
            stage.load_default_settings(page);
        }
    }

    fn move_selection(&mut self, page: PageId) {
        if self.selection.as_ref() != Some(&page) {
            self.sink.on_selection_changed(&page);
            self.selection = Some(page);
        }
    }
}

impl<S: DisplaySink> std::fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("mode", &self.mode())
            .field("terminal_stage", &self.terminal_stage)
            .field("selection", &self.selection)
            .field("interactive", &self.interactive)
            .field("batch", &self.batch)
            .field("pool", &self.pool)
            .finish()
    }
}
