//! Execution context: heartbeats and stalled-worker detection
//!
//! Every active worker posts a beat to the shared board each heartbeat
//! interval (alongside the `Heartbeat` record it appends to the store).
//! The monitor scans the board; a worker silent for more than
//! `stall_factor` intervals while holding an in-flight case is declared
//! stalled: its session is force-discarded, its case requeued once, and
//! run health flips to degraded immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::models::{NewLogEntry, TestCaseId, TestStatus, WorkerId};
use crate::session::Session;

use super::scheduler::RunShared;

#[derive(Debug, Default)]
struct WorkerState {
    current: Option<TestCaseId>,
    session: Option<Session>,
    last_beat: Option<Instant>,
    /// Bumped when the monitor steals the in-flight case, so a worker
    /// waking up late knows not to double-record
    generation: u64,
}

/// A stalled worker found by one monitor scan
#[derive(Debug)]
pub(crate) struct StalledWorker {
    pub worker: WorkerId,
    pub case: TestCaseId,
    pub session: Option<Session>,
}

/// Shared liveness board, one entry per registered worker
#[derive(Debug, Default)]
pub struct WorkerBoard {
    workers: Mutex<HashMap<usize, WorkerState>>,
    degraded: AtomicBool,
}

impl WorkerBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, worker: WorkerId) {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        workers.insert(worker.0, WorkerState::default());
    }

    pub fn retire(&self, worker: WorkerId) {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        workers.remove(&worker.0);
    }

    /// Record dispatch of a case; returns the generation to check at
    /// completion time
    pub fn start(&self, worker: WorkerId, case: &TestCaseId, session: &Session) -> u64 {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        let state = workers.entry(worker.0).or_default();
        state.current = Some(case.clone());
        state.session = Some(session.clone());
        state.last_beat = Some(Instant::now());
        state.generation
    }

    pub fn finish(&self, worker: WorkerId) {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        if let Some(state) = workers.get_mut(&worker.0) {
            state.current = None;
            state.session = None;
        }
    }

    pub fn beat(&self, worker: WorkerId) {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        if let Some(state) = workers.get_mut(&worker.0) {
            state.last_beat = Some(Instant::now());
        }
    }

    pub fn generation_matches(&self, worker: WorkerId, generation: u64) -> bool {
        let workers = self.workers.lock().expect("board mutex poisoned");
        workers
            .get(&worker.0)
            .map(|state| state.generation == generation)
            .unwrap_or(false)
    }

    /// Steal every in-flight case whose worker has been silent past the
    /// threshold
    pub(crate) fn collect_stalled(&self, threshold: Duration) -> Vec<StalledWorker> {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        let mut stalled = Vec::new();
        for (id, state) in workers.iter_mut() {
            let silent = state
                .last_beat
                .map(|beat| beat.elapsed() > threshold)
                .unwrap_or(false);
            if silent {
                if let Some(case) = state.current.take() {
                    state.generation += 1;
                    stalled.push(StalledWorker {
                        worker: WorkerId(*id),
                        case,
                        session: state.session.take(),
                    });
                }
            }
        }
        stalled
    }

    pub fn flag_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn backdate_beat(&self, worker: WorkerId, by: Duration) {
        let mut workers = self.workers.lock().expect("board mutex poisoned");
        if let Some(state) = workers.get_mut(&worker.0) {
            state.last_beat = Instant::now().checked_sub(by);
        }
    }
}

/// One monitor pass over the board
pub(crate) async fn scan_once(shared: &RunShared) {
    let threshold = shared.config.stall_threshold();
    for stalled in shared.board.collect_stalled(threshold) {
        warn!(
            "{} silent past {}ms while running {}, declaring stalled",
            stalled.worker,
            threshold.as_millis(),
            stalled.case
        );
        shared.mark_degraded();
        shared
            .record(NewLogEntry::stall(
                shared.run_id.clone(),
                stalled.worker,
                stalled.case.clone(),
            ))
            .await;

        if let Some(session) = stalled.session {
            shared.provider.discard(session).await;
        }

        if shared.queue.requeue(&stalled.case, shared.config.max_requeues) {
            debug!("requeued {} after stall", stalled.case);
        } else {
            shared
                .record(
                    NewLogEntry::result(
                        shared.run_id.clone(),
                        stalled.case,
                        TestStatus::Error,
                        "retry budget exhausted after repeated stall/crash",
                    )
                    .with_worker(stalled.worker),
                )
                .await;
        }
    }
}

/// Monitor task: scans the board once per heartbeat interval until the
/// scheduler aborts it at run end
pub(crate) async fn stall_monitor(shared: Arc<RunShared>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        scan_once(&shared).await;
    }
}
