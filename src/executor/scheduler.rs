//! Scheduler: run queue and worker pool
//!
//! Resolved case ids go into a FIFO queue; P workers drain it. Each
//! dispatch runs under a watchdog, emits heartbeats, and holds a leased
//! session for the duration of the case. A crashed or stalled case goes
//! back to the queue once, then is recorded as a terminal error.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::models::{NewLogEntry, Run, RunId, TestCaseId, TestStatus, WorkerId};
use crate::registry::PackRegistry;
use crate::session::SessionProvider;
use crate::store::{append_with_retry, BackoffPolicy, ResultStore};

use super::context::WorkerBoard;
use super::TestExecutor;

/// How long a waiting worker dozes before re-checking the queue, as a
/// guard against a wakeup racing the check
const QUEUE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct QueueInner {
    pending: VecDeque<TestCaseId>,
    /// Requeue count per case id, shared between crash and stall paths
    attempts: HashMap<TestCaseId, u32>,
    in_flight: usize,
    cancelled: bool,
    /// Cases drained by `cancel`, held until the orchestrator records them
    drained: Vec<TestCaseId>,
}

/// What a worker gets when it asks for work
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Next {
    Item(TestCaseId),
    /// Queue empty and nothing in flight
    Drained,
    Cancelled,
}

/// FIFO work queue for one run
#[derive(Debug, Default)]
pub struct RunQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl RunQueue {
    pub fn new(ids: Vec<TestCaseId>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                pending: ids.into(),
                ..QueueInner::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Wait for the next case. Returns `Drained` only once every popped
    /// case has been balanced by `task_done`, `requeue`, or
    /// `release_unclaimed`.
    pub async fn next(&self) -> Next {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue mutex poisoned");
                if inner.cancelled {
                    return Next::Cancelled;
                }
                if let Some(id) = inner.pending.pop_front() {
                    inner.in_flight += 1;
                    return Next::Item(id);
                }
                if inner.in_flight == 0 {
                    return Next::Drained;
                }
            }
            let _ = tokio::time::timeout(QUEUE_POLL, self.notify.notified()).await;
        }
    }

    /// A popped case reached a terminal record
    pub fn task_done(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.in_flight = inner.in_flight.saturating_sub(1);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Put a crashed or stalled case back, if its retry budget allows.
    /// Returns false when the budget is spent; the caller then records
    /// the terminal error.
    pub fn requeue(&self, id: &TestCaseId, max_requeues: u32) -> bool {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.in_flight = inner.in_flight.saturating_sub(1);
        let attempts = inner.attempts.entry(id.clone()).or_insert(0);
        *attempts += 1;
        let allowed = *attempts <= max_requeues && !inner.cancelled;
        if allowed {
            inner.pending.push_back(id.clone());
        }
        drop(inner);
        self.notify.notify_waiters();
        allowed
    }

    /// Give back a case the worker popped but never dispatched, without
    /// charging its retry budget
    pub fn release_unclaimed(&self, id: TestCaseId) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.pending.push_front(id);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Flip the cancel flag and move whatever was still pending into the
    /// drained stash. The stash is filled under the same lock the workers
    /// read the flag through, so by the time a worker sees `Cancelled` the
    /// drained cases are already waiting in `take_drained`.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().expect("queue mutex poisoned");
        inner.cancelled = true;
        let pending: Vec<TestCaseId> = inner.pending.drain(..).collect();
        inner.drained.extend(pending);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Cases that never dispatched, in their original queue order
    pub fn take_drained(&self) -> Vec<TestCaseId> {
        std::mem::take(&mut self.inner.lock().expect("queue mutex poisoned").drained)
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().expect("queue mutex poisoned").cancelled
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().expect("queue mutex poisoned").pending.len()
    }
}

/// Everything the workers and the stall monitor share for one run
pub(crate) struct RunShared {
    pub run_id: RunId,
    pub config: RunnerConfig,
    pub backoff: BackoffPolicy,
    pub registry: Arc<PackRegistry>,
    pub store: Arc<dyn ResultStore>,
    pub provider: Arc<dyn SessionProvider>,
    pub executor: Arc<dyn TestExecutor>,
    pub queue: RunQueue,
    pub board: WorkerBoard,
    pub runs: Arc<Mutex<HashMap<RunId, Run>>>,
    pub lost_writes: AtomicU64,
    /// Workers that retired because the session pool stayed exhausted
    pub starved_workers: AtomicUsize,
}

impl RunShared {
    /// Append through the retry policy; a write lost after the full
    /// budget is counted, never escalated
    pub async fn record(&self, entry: NewLogEntry) {
        if let Err(err) = append_with_retry(self.store.as_ref(), &self.backoff, entry).await {
            warn!("dropping record for {} after retries: {err}", self.run_id);
            self.lost_writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Flag run health degraded, both on the live board and the run row
    pub fn mark_degraded(&self) {
        self.board.flag_degraded();
        let mut runs = self.runs.lock().expect("runs mutex poisoned");
        if let Some(run) = runs.get_mut(&self.run_id) {
            run.degraded = true;
        }
    }
}

enum Disposition {
    /// Terminal record written (or intentionally skipped), session
    /// returned or discarded
    Settled,
    /// Executor task panicked; caller decides requeue vs give-up
    Crashed,
    /// The stall monitor stole the case mid-flight; it owns the
    /// bookkeeping now
    Stolen,
}

/// One worker's life: stagger in, drain the queue, retire
pub(crate) async fn worker_loop(shared: Arc<RunShared>, worker: WorkerId) {
    let stagger = shared.config.worker_stagger() * worker.0.saturating_sub(1) as u32;
    if !stagger.is_zero() {
        tokio::time::sleep(stagger).await;
    }
    shared.board.register(worker);
    debug!("{worker} online for {}", shared.run_id);

    loop {
        let id = match shared.queue.next().await {
            Next::Item(id) => id,
            Next::Drained | Next::Cancelled => break,
        };

        let session = match shared
            .provider
            .acquire(shared.config.session_timeout())
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!("{worker} retiring, no session available: {err}");
                shared.queue.release_unclaimed(id);
                shared.starved_workers.fetch_add(1, Ordering::SeqCst);
                break;
            }
        };

        match run_one(&shared, worker, &id, session).await {
            Disposition::Settled => shared.queue.task_done(),
            Disposition::Crashed => {
                if shared.queue.requeue(&id, shared.config.max_requeues) {
                    shared
                        .record(NewLogEntry::info(
                            shared.run_id.clone(),
                            format!("{id} requeued after worker crash on {worker}"),
                        ))
                        .await;
                } else {
                    shared
                        .record(
                            NewLogEntry::result(
                                shared.run_id.clone(),
                                id.clone(),
                                TestStatus::Error,
                                "retry budget exhausted after repeated stall/crash",
                            )
                            .with_worker(worker),
                        )
                        .await;
                }
            }
            Disposition::Stolen => {}
        }
        shared.board.finish(worker);
    }

    shared.board.retire(worker);
    debug!("{worker} retired");
}

/// Execute one case under the watchdog, emitting heartbeats while it
/// runs
async fn run_one(
    shared: &Arc<RunShared>,
    worker: WorkerId,
    id: &TestCaseId,
    session: crate::session::Session,
) -> Disposition {
    let case = match shared.registry.case(id) {
        Some(case) => case.clone(),
        None => {
            // resolution happens against the same frozen registry, so
            // this only fires on a store replay of a stale catalog
            shared
                .record(
                    NewLogEntry::result(
                        shared.run_id.clone(),
                        id.clone(),
                        TestStatus::Error,
                        "case id not present in registry",
                    )
                    .with_worker(worker),
                )
                .await;
            shared.provider.release(session).await;
            return Disposition::Settled;
        }
    };

    let generation = shared.board.start(worker, id, &session);
    let started = std::time::Instant::now();

    let executor = shared.executor.clone();
    let exec_case = case.clone();
    let exec_session = session.clone();
    let mut handle =
        tokio::spawn(async move { executor.execute(&exec_case, &exec_session).await });

    let mut beats = tokio::time::interval(shared.config.heartbeat_interval());
    beats.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    beats.tick().await;
    let deadline = tokio::time::Instant::now() + shared.config.test_timeout();

    loop {
        tokio::select! {
            joined = &mut handle => {
                let elapsed = started.elapsed().as_millis() as u64;
                if !shared.board.generation_matches(worker, generation) {
                    debug!("{id} stolen from {worker} mid-flight, discarding outcome");
                    return Disposition::Stolen;
                }
                return match joined {
                    Ok(Ok(outcome)) => {
                        shared
                            .record(
                                NewLogEntry::result(
                                    shared.run_id.clone(),
                                    id.clone(),
                                    outcome.status,
                                    outcome.message,
                                )
                                .with_worker(worker)
                                .with_duration_ms(elapsed),
                            )
                            .await;
                        shared.provider.release(session).await;
                        Disposition::Settled
                    }
                    Ok(Err(fault)) => {
                        shared
                            .record(
                                NewLogEntry::result(
                                    shared.run_id.clone(),
                                    id.clone(),
                                    TestStatus::Error,
                                    format!("infrastructure fault: {fault}"),
                                )
                                .with_worker(worker)
                                .with_duration_ms(elapsed),
                            )
                            .await;
                        // the session may be wedged by whatever faulted
                        shared.provider.discard(session).await;
                        Disposition::Settled
                    }
                    Err(join_err) if join_err.is_panic() => {
                        warn!("{worker} crashed running {id}");
                        shared.provider.discard(session).await;
                        Disposition::Crashed
                    }
                    Err(_) => {
                        shared
                            .record(
                                NewLogEntry::result(
                                    shared.run_id.clone(),
                                    id.clone(),
                                    TestStatus::Error,
                                    "execution task cancelled externally",
                                )
                                .with_worker(worker)
                                .with_duration_ms(elapsed),
                            )
                            .await;
                        shared.provider.discard(session).await;
                        Disposition::Settled
                    }
                };
            }
            _ = beats.tick() => {
                shared.board.beat(worker);
                shared
                    .record(NewLogEntry::heartbeat(
                        shared.run_id.clone(),
                        worker,
                        Some(id.clone()),
                    ))
                    .await;
            }
            _ = tokio::time::sleep_until(deadline) => {
                handle.abort();
                if !shared.board.generation_matches(worker, generation) {
                    return Disposition::Stolen;
                }
                let elapsed = started.elapsed().as_millis() as u64;
                shared
                    .record(
                        NewLogEntry::result(
                            shared.run_id.clone(),
                            id.clone(),
                            TestStatus::Timeout,
                            format!("no result within {}s", shared.config.test_timeout_secs),
                        )
                        .with_worker(worker)
                        .with_duration_ms(elapsed),
                    )
                    .await;
                shared.provider.discard(session).await;
                return Disposition::Settled;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<TestCaseId> {
        names.iter().map(|n| TestCaseId::from(*n)).collect()
    }

    #[tokio::test]
    async fn test_queue_fifo_order() {
        let queue = RunQueue::new(ids(&["a", "b", "c"]));
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("a")));
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("b")));
        queue.task_done();
        queue.task_done();
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("c")));
        queue.task_done();
        assert_eq!(queue.next().await, Next::Drained);
    }

    #[tokio::test]
    async fn test_queue_waits_for_in_flight_before_draining() {
        let queue = Arc::new(RunQueue::new(ids(&["a"])));
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("a")));

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        // still in flight, the waiter must not see Drained yet
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        queue.task_done();
        assert_eq!(waiter.await.unwrap(), Next::Drained);
    }

    #[tokio::test]
    async fn test_requeue_budget_is_single_shot() {
        let queue = RunQueue::new(ids(&["flaky"]));
        let flaky = TestCaseId::from("flaky");

        assert_eq!(queue.next().await, Next::Item(flaky.clone()));
        assert!(queue.requeue(&flaky, 1), "first requeue allowed");

        assert_eq!(queue.next().await, Next::Item(flaky.clone()));
        assert!(!queue.requeue(&flaky, 1), "second requeue denied");
        assert_eq!(queue.next().await, Next::Drained);
    }

    #[tokio::test]
    async fn test_cancel_drains_pending_and_wakes_waiters() {
        let queue = Arc::new(RunQueue::new(ids(&["a", "b", "c"])));
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("a")));

        queue.cancel();
        assert_eq!(queue.next().await, Next::Cancelled);
        // a requeue after cancel is refused
        assert!(!queue.requeue(&TestCaseId::from("a"), 5));
        // the drained cases wait in the stash until taken, exactly once
        assert_eq!(queue.take_drained(), ids(&["b", "c"]));
        assert!(queue.take_drained().is_empty());
    }

    #[tokio::test]
    async fn test_release_unclaimed_goes_back_to_front() {
        let queue = RunQueue::new(ids(&["a", "b"]));
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("a")));
        queue.release_unclaimed(TestCaseId::from("a"));
        // same case comes out first again, budget untouched
        assert_eq!(queue.next().await, Next::Item(TestCaseId::from("a")));
        assert!(queue.requeue(&TestCaseId::from("a"), 1));
    }
}
