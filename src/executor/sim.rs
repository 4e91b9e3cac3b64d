//! Scripted executor for demos and scheduler tests
//!
//! Real deployments plug a browser- or API-driving executor in behind
//! [`TestExecutor`]; the simulator stands in for it with per-case
//! scripted behaviors and a concurrency probe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::ExecutorFault;
use crate::models::{TestCase, TestCaseId};
use crate::session::Session;

use super::{ExecutionOutcome, TestExecutor};

/// What the simulator does when handed a given case
#[derive(Clone, Debug)]
pub enum Behavior {
    /// Succeed after the given delay
    Pass(Duration),
    /// Run to completion but report a failure
    Fail(String),
    /// Never return; only the watchdog ends it
    Hang,
    /// Panic the execution task
    Panic,
    /// Panic on the first attempt, pass on the retry
    PanicOnce,
    /// Report an infrastructure fault
    Infra(String),
}

/// Executor that follows a per-case script
pub struct SimulatedExecutor {
    behaviors: Mutex<HashMap<TestCaseId, Behavior>>,
    default_delay: Duration,
    tripped: Mutex<HashMap<TestCaseId, Arc<AtomicBool>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            default_delay: Duration::from_millis(5),
            tripped: Mutex::new(HashMap::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Override the delay used by unscripted cases
    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn script(self, id: impl Into<TestCaseId>, behavior: Behavior) -> Self {
        self.behaviors
            .lock()
            .expect("behavior mutex poisoned")
            .insert(id.into(), behavior);
        self
    }

    /// Highest number of cases observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, id: &TestCaseId) -> Behavior {
        self.behaviors
            .lock()
            .expect("behavior mutex poisoned")
            .get(id)
            .cloned()
            .unwrap_or(Behavior::Pass(self.default_delay))
    }

    fn trip_flag(&self, id: &TestCaseId) -> Arc<AtomicBool> {
        self.tripped
            .lock()
            .expect("trip mutex poisoned")
            .entry(id.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks concurrency even when the execution task is aborted mid-hang
struct ActiveGuard<'a>(&'a SimulatedExecutor);

impl<'a> ActiveGuard<'a> {
    fn enter(sim: &'a SimulatedExecutor) -> Self {
        let now = sim.active.fetch_add(1, Ordering::SeqCst) + 1;
        sim.peak.fetch_max(now, Ordering::SeqCst);
        Self(sim)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl TestExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        case: &TestCase,
        _session: &Session,
    ) -> Result<ExecutionOutcome, ExecutorFault> {
        let _guard = ActiveGuard::enter(self);
        match self.behavior_for(&case.id) {
            Behavior::Pass(delay) => {
                tokio::time::sleep(delay).await;
                Ok(ExecutionOutcome::passed())
            }
            Behavior::Fail(message) => {
                tokio::time::sleep(self.default_delay).await;
                Ok(ExecutionOutcome::failed(message))
            }
            Behavior::Hang => loop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            },
            Behavior::Panic => panic!("scripted crash for {}", case.id),
            Behavior::PanicOnce => {
                let flag = self.trip_flag(&case.id);
                if !flag.swap(true, Ordering::SeqCst) {
                    panic!("scripted first-attempt crash for {}", case.id);
                }
                tokio::time::sleep(self.default_delay).await;
                Ok(ExecutionOutcome::passed())
            }
            Behavior::Infra(message) => Err(ExecutorFault(message)),
        }
    }
}

/// Executor that passes everything after a small randomized delay;
/// backs the CLI demo runs
pub struct RandomizedExecutor {
    min_ms: u64,
    max_ms: u64,
    fail_one_in: u32,
}

impl RandomizedExecutor {
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms,
            max_ms: max_ms.max(min_ms + 1),
            fail_one_in: 8,
        }
    }
}

#[async_trait]
impl TestExecutor for RandomizedExecutor {
    async fn execute(
        &self,
        case: &TestCase,
        _session: &Session,
    ) -> Result<ExecutionOutcome, ExecutorFault> {
        let (delay_ms, failed) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(self.min_ms..self.max_ms),
                rng.gen_ratio(1, self.fail_one_in),
            )
        };
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if failed {
            Ok(ExecutionOutcome::failed(format!(
                "simulated assertion failure in {}",
                case.id
            )))
        } else {
            Ok(ExecutionOutcome::passed())
        }
    }
}
