//! Run orchestration
//!
//! Ties the registry, session pool, result store, and worker scheduler
//! together. `trigger` resolves a request against the frozen registry,
//! assigns a run id, and spawns the run; `run_to_completion` is the
//! blocking variant the CLI uses.

mod context;
mod scheduler;
pub mod sim;

pub use context::WorkerBoard;
pub use scheduler::{Next, RunQueue};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::RunnerConfig;
use crate::error::{ExecutorFault, RtvsError};
use crate::models::{
    generate_run_id, NewLogEntry, Run, RunId, RunRequest, RunStatus, TestCase, TestCaseId,
    TestStatus, WorkerId,
};
use crate::registry::{ComboResolver, PackRegistry};
use crate::session::{Session, SessionProvider};
use crate::store::{BackoffPolicy, ResultStore};

use scheduler::{worker_loop, RunShared};

/// What an executor reports for a case that ran to completion.
///
/// Assertion failures are `Failed` outcomes, not errors; `Err` is
/// reserved for infrastructure faults underneath the test itself.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    pub status: TestStatus,
    pub message: String,
}

impl ExecutionOutcome {
    pub fn passed() -> Self {
        Self {
            status: TestStatus::Passed,
            message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: TestStatus::Failed,
            message: message.into(),
        }
    }
}

/// The pluggable seam for actually driving a test case
#[async_trait]
pub trait TestExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        case: &TestCase,
        session: &Session,
    ) -> Result<ExecutionOutcome, ExecutorFault>;
}

/// Central run coordinator; cheap to clone, all state shared
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<PackRegistry>,
    store: Arc<dyn ResultStore>,
    provider: Arc<dyn SessionProvider>,
    executor: Arc<dyn TestExecutor>,
    config: RunnerConfig,
    runs: Arc<Mutex<HashMap<RunId, Run>>>,
    active: Arc<Mutex<HashMap<RunId, Arc<RunShared>>>>,
    handles: Arc<Mutex<HashMap<RunId, JoinHandle<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<PackRegistry>,
        store: Arc<dyn ResultStore>,
        provider: Arc<dyn SessionProvider>,
        executor: Arc<dyn TestExecutor>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            registry,
            store,
            provider,
            executor,
            config,
            runs: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(Mutex::new(HashMap::new())),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve, register, and spawn a run. Fails closed before any
    /// dispatch when the selection doesn't resolve.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self, request: RunRequest) -> Result<RunId, RtvsError> {
        if !self.registry.is_frozen() {
            return Err(RtvsError::Config(
                "registry must be validated before triggering runs".to_string(),
            ));
        }

        let resolved = {
            let mut resolver = ComboResolver::new(&self.registry);
            resolver.resolve_selection(&request.selection, &request.filters)?
        };

        // manual cases stay in the resolved list for reporting but are
        // never dispatched
        let (automated, manual): (Vec<_>, Vec<_>) = resolved
            .iter()
            .cloned()
            .partition(|id| {
                self.registry
                    .case(id)
                    .map(|case| case.automation.is_automated())
                    .unwrap_or(false)
            });

        let run_id = generate_run_id(&request);
        let mut run = Run::new(run_id.clone(), request, resolved);
        run.membership = self.registry.membership_snapshot();
        let worker_count = run.worker_count;

        self.runs
            .lock()
            .expect("runs mutex poisoned")
            .insert(run_id.clone(), run);

        let shared = Arc::new(RunShared {
            run_id: run_id.clone(),
            config: self.config.clone(),
            backoff: BackoffPolicy::from_config(&self.config),
            registry: self.registry.clone(),
            store: self.store.clone(),
            provider: self.provider.clone(),
            executor: self.executor.clone(),
            queue: RunQueue::new(automated),
            board: WorkerBoard::new(),
            runs: self.runs.clone(),
            lost_writes: AtomicU64::new(0),
            starved_workers: AtomicUsize::new(0),
        });
        self.active
            .lock()
            .expect("active mutex poisoned")
            .insert(run_id.clone(), shared.clone());

        let this = self.clone();
        let handle = tokio::spawn(async move {
            this.execute_run(shared, manual, worker_count).await;
        });
        self.handles
            .lock()
            .expect("handles mutex poisoned")
            .insert(run_id.clone(), handle);

        Ok(run_id)
    }

    /// Trigger and wait for the terminal state
    pub async fn run_to_completion(&self, request: RunRequest) -> Result<Run, RtvsError> {
        let run_id = self.trigger(request)?;
        self.wait(&run_id).await
    }

    /// Wait for a triggered run to reach a terminal state
    pub async fn wait(&self, run_id: &RunId) -> Result<Run, RtvsError> {
        let handle = self
            .handles
            .lock()
            .expect("handles mutex poisoned")
            .remove(run_id);
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.run(run_id)
            .ok_or_else(|| RtvsError::Config(format!("no such run: {run_id}")))
    }

    /// Cooperative cancel: in-flight cases finish, queued cases are
    /// drained and recorded as aborted while the run winds down
    pub fn cancel(&self, run_id: &RunId) -> bool {
        let shared = {
            let active = self.active.lock().expect("active mutex poisoned");
            match active.get(run_id) {
                Some(shared) => shared.clone(),
                None => return false,
            }
        };
        shared.queue.cancel();
        true
    }

    /// Snapshot of a run's current row
    pub fn run(&self, run_id: &RunId) -> Option<Run> {
        self.runs
            .lock()
            .expect("runs mutex poisoned")
            .get(run_id)
            .cloned()
    }

    /// All known runs, newest start first
    pub fn runs(&self) -> Vec<Run> {
        let mut runs: Vec<Run> = self
            .runs
            .lock()
            .expect("runs mutex poisoned")
            .values()
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    fn with_run(&self, run_id: &RunId, apply: impl FnOnce(&mut Run)) {
        let mut runs = self.runs.lock().expect("runs mutex poisoned");
        if let Some(run) = runs.get_mut(run_id) {
            apply(run);
        }
    }

    async fn execute_run(
        &self,
        shared: Arc<RunShared>,
        manual: Vec<TestCaseId>,
        worker_count: usize,
    ) {
        let run_id = shared.run_id.clone();
        self.with_run(&run_id, |run| run.advance(RunStatus::Running));
        info!(
            "{run_id} started: {} queued, {} manual, {} workers",
            shared.queue.pending_len(),
            manual.len(),
            worker_count
        );
        shared
            .record(NewLogEntry::info(
                run_id.clone(),
                format!(
                    "run started with {} dispatchable cases across {} workers",
                    shared.queue.pending_len(),
                    worker_count
                ),
            ))
            .await;
        for id in &manual {
            shared
                .record(NewLogEntry::info(
                    run_id.clone(),
                    format!("{id} is not automated, excluded from dispatch"),
                ))
                .await;
        }

        let monitor = tokio::spawn(context::stall_monitor(shared.clone()));
        let workers: Vec<JoinHandle<()>> = (1..=worker_count)
            .map(|slot| tokio::spawn(worker_loop(shared.clone(), WorkerId(slot))))
            .collect();
        let _ = futures::future::join_all(workers).await;
        monitor.abort();

        let was_cancelled = shared.queue.is_cancelled();
        // a cancel moved pending cases into the drained stash already, so
        // anything drained here means every worker retired without a session
        shared.queue.cancel();
        let leftover = shared.queue.take_drained();
        let reason = if was_cancelled {
            "run cancelled before dispatch"
        } else {
            "no session available, dispatch abandoned"
        };
        for id in &leftover {
            shared
                .record(NewLogEntry::result(
                    run_id.clone(),
                    id.clone(),
                    TestStatus::Aborted,
                    reason,
                ))
                .await;
        }

        let lost_writes = shared.lost_writes.load(Ordering::SeqCst);
        let degraded = shared.board.is_degraded();
        let starved = !leftover.is_empty() && !was_cancelled;

        let mut final_status = RunStatus::Completed;
        self.with_run(&run_id, |run| {
            run.aborted_cases.extend(leftover.iter().cloned());
            run.lost_writes = lost_writes;
            run.degraded |= degraded;
            // a cancel that caught nothing before dispatch still completed
            // every case it ran
            final_status = if starved {
                RunStatus::Aborted
            } else if lost_writes > 0 || !run.aborted_cases.is_empty() {
                RunStatus::PartiallyCompleted
            } else {
                RunStatus::Completed
            };
            run.advance(final_status);
        });

        shared
            .record(NewLogEntry::run_closed(run_id.clone(), final_status))
            .await;
        info!("{run_id} finished: {final_status}");

        self.active
            .lock()
            .expect("active mutex poisoned")
            .remove(&run_id);
    }
}
