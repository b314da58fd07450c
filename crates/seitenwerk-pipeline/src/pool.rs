// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded worker pool.
//
// A fixed set of named OS threads pulls tasks from a shared job channel, runs
// each chain to completion (or to the next stage boundary after a cancel) and
// posts the result on a single-consumer channel read only by the controller.
// Workers never touch the processing queues.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use seitenwerk_core::error::{Result, SeitenwerkError};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use crate::stage::StageFailure;
use crate::task::{Outcome, Task, TaskResult};

/// Fixed-capacity pool of worker threads.
pub struct WorkerPool {
    capacity: usize,
    /// Tasks submitted and not yet reported.
    in_flight: Arc<AtomicUsize>,
    /// Pool-wide stop signal, checked at stage boundaries.
    halt: Arc<AtomicBool>,
    jobs: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `capacity` workers posting their results to `results`.
    pub fn new(capacity: usize, results: UnboundedSender<TaskResult>) -> Result<Self> {
        if capacity == 0 {
            return Err(SeitenwerkError::Config(
                "worker pool needs at least one thread".into(),
            ));
        }

        let (jobs, job_rx) = mpsc::channel::<Task>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let halt = Arc::new(AtomicBool::new(false));

        let mut pool = Self {
            capacity,
            in_flight: Arc::clone(&in_flight),
            halt: Arc::clone(&halt),
            jobs: Some(jobs),
            workers: Vec::with_capacity(capacity),
        };

        for index in 0..capacity {
            let job_rx = Arc::clone(&job_rx);
            let results = results.clone();
            let in_flight = Arc::clone(&in_flight);
            let halt = Arc::clone(&halt);

            let handle = thread::Builder::new()
                .name(format!("page-worker-{index}"))
                .spawn(move || worker_loop(index, job_rx, results, in_flight, halt))
                .map_err(|e| SeitenwerkError::WorkerSpawn(e.to_string()))?;
            pool.workers.push(handle);
        }

        info!(capacity, "worker pool started");
        Ok(pool)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks submitted and not yet reported.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.in_flight() < self.capacity
    }

    /// Hand a task to the workers.  Never blocks: if every worker is busy
    /// the task waits in the job channel.
    pub fn submit(&self, task: Task) -> Result<()> {
        let Some(jobs) = &self.jobs else {
            return Err(SeitenwerkError::PoolShutDown);
        };

        debug!(
            page = %task.page(),
            task_id = %task.id(),
            debug = task.is_debug(),
            "submitting task"
        );
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if jobs.send(task).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(SeitenwerkError::PoolShutDown);
        }
        Ok(())
    }

    /// Stop all workers and wait for them to exit.  Running chains stop at
    /// their next stage boundary; tasks still waiting are reported as
    /// cancelled without running.  Idempotent.
    pub fn shutdown(&mut self) {
        if self.jobs.is_none() && self.workers.is_empty() {
            return;
        }

        self.halt.store(true, Ordering::Release);
        // Closing the job channel lets idle workers fall out of `recv`.
        self.jobs = None;

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked during shutdown");
            }
        }
        info!("worker pool shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.jobs.is_none()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("capacity", &self.capacity)
            .field("in_flight", &self.in_flight())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Worker thread loop.
fn worker_loop(
    index: usize,
    jobs: Arc<Mutex<Receiver<Task>>>,
    results: UnboundedSender<TaskResult>,
    in_flight: Arc<AtomicUsize>,
    halt: Arc<AtomicBool>,
) {
    debug!(worker = index, "worker started");
    loop {
        let next = {
            let receiver = match jobs.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            receiver.recv()
        };
        // Disconnected: the pool is shutting down and the channel is empty.
        let Ok(task) = next else { break };

        let result = if halt.load(Ordering::Acquire) {
            task.into_cancelled_result()
        } else {
            run_guarded(task, &halt)
        };

        // Free the slot before reporting so the controller sees the spare
        // capacity when it handles this result.
        in_flight.fetch_sub(1, Ordering::AcqRel);
        if results.send(result).is_err() {
            debug!(worker = index, "result receiver dropped");
        }
    }
    debug!(worker = index, "worker exiting");
}

/// Run a task, turning a panicking stage into a failure result so the page
/// still gets reported and the worker survives.
fn run_guarded(task: Task, halt: &AtomicBool) -> TaskResult {
    let task_id = task.id();
    let page = task.page().clone();
    let mode = task.mode();
    let stage = task.terminal_stage();

    match catch_unwind(AssertUnwindSafe(|| task.run(halt))) {
        Ok(result) => result,
        Err(_) => {
            error!(page = %page, task_id = %task_id, "stage panicked");
            TaskResult {
                task_id,
                page,
                mode,
                stage,
                outcome: Outcome::Failed(StageFailure::new("stage panicked")),
                elapsed: Duration::ZERO,
            }
        }
    }
}
