// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page-keyed processing queue.
//
// The queue holds pending and in-flight tasks in page-sequence order.  The
// controller appends pages starting at the selection leader and wrapping
// forward, so queue order is also dispatch order.  The queue is owned by the
// controller alone; workers never see it.
//
// Cancelled in-flight entries leave the live queue at once but stay in a
// small draining set until their worker reports, so their results can be
// recognised and dropped.

use std::collections::{HashMap, HashSet, VecDeque};

use seitenwerk_core::error::{Result, SeitenwerkError};
use seitenwerk_core::types::{PageId, TaskId};
use tracing::{debug, info, instrument};

use crate::task::{CancelFlag, Task};

/// Where an entry is in its lifecycle.  Done and cancelled entries are
/// removed, so only the two live states are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    InFlight,
}

/// What [`ProcessingQueue::finish`] did with a reported task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishOutcome {
    /// The in-flight entry is done and was removed.
    Finished,
    /// The entry had been cancelled; its result must be dropped.
    Discarded,
    /// The queue knows nothing about this task (already finished, or never
    /// queued here).
    Unknown,
}

struct Entry {
    page: PageId,
    task_id: TaskId,
    cancel: CancelFlag,
    status: EntryStatus,
    /// Present while pending; handed out by `take_next`.
    task: Option<Task>,
}

/// Ordered pending/in-flight work, at most one live entry per page.
#[derive(Default)]
pub struct ProcessingQueue {
    entries: VecDeque<Entry>,
    draining: HashMap<TaskId, PageId>,
}

impl ProcessingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task.  Rejected, leaving the queue untouched, if the page
    /// already has pending or in-flight work.
    #[instrument(skip(self, task), fields(page = %task.page(), task_id = %task.id()))]
    pub fn enqueue(&mut self, task: Task) -> Result<()> {
        if self.contains(task.page()) {
            debug!("page already queued, rejecting");
            return Err(SeitenwerkError::AlreadyQueued(task.page().clone()));
        }

        self.entries.push_back(Entry {
            page: task.page().clone(),
            task_id: task.id(),
            cancel: task.cancel_flag(),
            status: EntryStatus::Pending,
            task: Some(task),
        });
        Ok(())
    }

    /// Hand out the earliest pending task, marking its entry in flight.
    pub fn take_next(&mut self) -> Option<Task> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.status == EntryStatus::Pending)?;
        entry.status = EntryStatus::InFlight;
        let task = entry.task.take();
        debug!(page = %entry.page, task_id = %entry.task_id, "task taken for processing");
        task
    }

    /// Retire a task whose worker has reported.  Idempotent.
    pub fn finish(&mut self, task_id: TaskId) -> FinishOutcome {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|e| e.task_id == task_id && e.status == EntryStatus::InFlight)
        {
            if let Some(entry) = self.entries.remove(pos) {
                debug!(page = %entry.page, task_id = %task_id, "task finished");
            }
            return FinishOutcome::Finished;
        }

        if let Some(page) = self.draining.remove(&task_id) {
            debug!(page = %page, task_id = %task_id, "cancelled task drained");
            return FinishOutcome::Discarded;
        }

        FinishOutcome::Unknown
    }

    /// Cancel everything.  Pending entries vanish now; in-flight ones drain
    /// as their workers report.  Returns the number of entries cancelled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.cancel.cancel();
            if entry.status == EntryStatus::InFlight {
                self.draining.insert(entry.task_id, entry.page);
            }
        }
        if count > 0 {
            info!(count, "cancelled all queued work");
        }
        count
    }

    /// Cancel the entries for `pages` (e.g. pages deleted from the project).
    pub fn cancel_matching(&mut self, pages: &HashSet<PageId>) -> usize {
        let mut kept = VecDeque::with_capacity(self.entries.len());
        let mut count = 0;

        for entry in self.entries.drain(..) {
            if !pages.contains(&entry.page) {
                kept.push_back(entry);
                continue;
            }
            entry.cancel.cancel();
            if entry.status == EntryStatus::InFlight {
                self.draining.insert(entry.task_id, entry.page);
            }
            count += 1;
        }

        self.entries = kept;
        if count > 0 {
            info!(count, "cancelled queued work for removed pages");
        }
        count
    }

    /// The page the user should be looking at: the first remaining page at
    /// or after the point the queue started from.  Queue order already
    /// starts there and wraps forward, so this is the front entry.
    pub fn selected_page(&self) -> Option<&PageId> {
        self.entries.front().map(|e| &e.page)
    }

    /// No pending and no in-flight entries.  Draining cancelled entries do
    /// not count.
    pub fn all_processed(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, page: &PageId) -> bool {
        self.entries.iter().any(|e| &e.page == page)
    }

    pub fn status(&self, page: &PageId) -> Option<EntryStatus> {
        self.entries
            .iter()
            .find(|e| &e.page == page)
            .map(|e| e.status)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.count(EntryStatus::Pending)
    }

    pub fn in_flight_count(&self) -> usize {
        self.count(EntryStatus::InFlight)
    }

    /// Cancelled tasks still running on a worker.
    pub fn draining_count(&self) -> usize {
        self.draining.len()
    }

    fn count(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }
}

impl std::fmt::Debug for ProcessingQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingQueue")
            .field("pending", &self.pending_count())
            .field("in_flight", &self.in_flight_count())
            .field("draining", &self.draining.len())
            .finish()
    }
}
