// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted stages shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use seitenwerk_core::types::PageId;

use crate::stage::{ExecuteNode, Payload, ProbeNode, ProbeVerdict, Stage, StageFailure, StageRegistry};

pub fn page(name: &str) -> PageId {
    PageId::single(name)
}

/// Stage indices a payload has passed through, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace(pub Vec<usize>);

#[derive(Default)]
struct LogInner {
    executed: Vec<(PageId, usize)>,
    created: Vec<(usize, bool, bool)>,
    defaults: usize,
    probes: usize,
}

/// Everything the scripted stages did, shared across threads.
#[derive(Clone, Default)]
pub struct StageLog {
    inner: Arc<Mutex<LogInner>>,
}

impl StageLog {
    fn with<R>(&self, f: impl FnOnce(&mut LogInner) -> R) -> R {
        let mut guard = self.inner.lock().expect("stage log lock");
        f(&mut guard)
    }

    /// `(page, stage)` for every executed node, in execution order.
    pub fn executed(&self) -> Vec<(PageId, usize)> {
        self.with(|l| l.executed.clone())
    }

    /// Pages whose stage-0 node ran, in order.
    pub fn started_pages(&self) -> Vec<PageId> {
        self.with(|l| {
            l.executed
                .iter()
                .filter(|(_, stage)| *stage == 0)
                .map(|(p, _)| p.clone())
                .collect()
        })
    }

    /// `(stage, batch, debug)` for every created execute node, in creation order.
    pub fn created(&self) -> Vec<(usize, bool, bool)> {
        self.with(|l| l.created.clone())
    }

    pub fn defaults_loaded(&self) -> usize {
        self.with(|l| l.defaults)
    }

    pub fn probe_calls(&self) -> usize {
        self.with(|l| l.probes)
    }
}

/// Holds nodes inside `execute` until opened.
#[derive(Clone, Default)]
pub struct Gate {
    state: Arc<(Mutex<bool>, Condvar)>,
    entered: Arc<AtomicUsize>,
}

impl Gate {
    fn wait(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let (lock, cvar) = &*self.state;
        let mut open = lock.lock().expect("gate lock");
        while !*open {
            open = cvar.wait(open).expect("gate wait");
        }
    }

    pub fn open(&self) {
        let (lock, cvar) = &*self.state;
        *lock.lock().expect("gate lock") = true;
        cvar.notify_all();
    }

    /// Block until `n` nodes are parked at the gate.
    pub fn wait_entered(&self, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.entered.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "nodes never reached the gate");
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

/// Tracks how many nodes execute at once.
#[derive(Clone, Default)]
pub struct ConcurrencyMeter {
    current: Arc<AtomicUsize>,
    max: Arc<AtomicUsize>,
}

impl ConcurrencyMeter {
    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

pub struct ScriptedStage {
    name: String,
    index: usize,
    log: StageLog,
    fail_on: HashSet<PageId>,
    stale_on: HashSet<PageId>,
    gate: Option<Gate>,
    meter: Option<ConcurrencyMeter>,
    delay: Duration,
}

impl ScriptedStage {
    pub fn new(name: &str, index: usize, log: StageLog) -> Self {
        Self {
            name: name.to_string(),
            index,
            log,
            fail_on: HashSet::new(),
            stale_on: HashSet::new(),
            gate: None,
            meter: None,
            delay: Duration::ZERO,
        }
    }

    pub fn failing_on(mut self, page: PageId) -> Self {
        self.fail_on.insert(page);
        self
    }

    pub fn stale_on(mut self, page: PageId) -> Self {
        self.stale_on.insert(page);
        self
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn metered(mut self, meter: ConcurrencyMeter, delay: Duration) -> Self {
        self.meter = Some(meter);
        self.delay = delay;
        self
    }
}

impl Stage for ScriptedStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_default_settings(&self, _page: &PageId) {
        self.log.with(|l| l.defaults += 1);
    }

    fn create_execute_node(&self, page: &PageId, batch: bool, debug: bool) -> Box<dyn ExecuteNode> {
        self.log.with(|l| l.created.push((self.index, batch, debug)));
        Box::new(ScriptedNode {
            page: page.clone(),
            index: self.index,
            log: self.log.clone(),
            fail: self.fail_on.contains(page),
            gate: self.gate.clone(),
            meter: self.meter.clone(),
            delay: self.delay,
        })
    }

    fn create_probe_node(&self) -> Box<dyn ProbeNode> {
        Box::new(ScriptedProbe {
            stale_on: self.stale_on.clone(),
            log: self.log.clone(),
        })
    }
}

struct ScriptedNode {
    page: PageId,
    index: usize,
    log: StageLog,
    fail: bool,
    gate: Option<Gate>,
    meter: Option<ConcurrencyMeter>,
    delay: Duration,
}

impl ExecuteNode for ScriptedNode {
    fn execute(&mut self, input: Payload) -> Result<Payload, StageFailure> {
        self.log
            .with(|l| l.executed.push((self.page.clone(), self.index)));
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        if let Some(meter) = &self.meter {
            let now = meter.current.fetch_add(1, Ordering::SeqCst) + 1;
            meter.max.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            meter.current.fetch_sub(1, Ordering::SeqCst);
        }
        if self.fail {
            return Err(StageFailure::new(format!("stage {} refused page", self.index)));
        }
        let mut trace = if input.is_empty() {
            Trace::default()
        } else {
            input
                .downcast::<Trace>()
                .map_err(|_| StageFailure::new("unexpected payload"))?
        };
        trace.0.push(self.index);
        Ok(Payload::new(trace))
    }
}

struct ScriptedProbe {
    stale_on: HashSet<PageId>,
    log: StageLog,
}

impl ProbeNode for ScriptedProbe {
    fn probe(&self, page: &PageId) -> ProbeVerdict {
        self.log.with(|l| l.probes += 1);
        if self.stale_on.contains(page) {
            ProbeVerdict::Stale
        } else {
            ProbeVerdict::Valid
        }
    }
}

/// `count` plain stages named `stage-0`, `stage-1`, ...
pub fn registry(log: &StageLog, count: usize) -> StageRegistry {
    registry_with(log, count, |_, stage| stage)
}

/// Like [`registry`] but lets the caller adjust each stage.
pub fn registry_with(
    log: &StageLog,
    count: usize,
    mut adjust: impl FnMut(usize, ScriptedStage) -> ScriptedStage,
) -> StageRegistry {
    let stages = (0..count)
        .map(|i| {
            let stage = ScriptedStage::new(&format!("stage-{i}"), i, log.clone());
            Arc::new(adjust(i, stage)) as Arc<dyn Stage>
        })
        .collect();
    StageRegistry::new(stages).expect("non-empty registry")
}
