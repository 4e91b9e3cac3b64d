//! Result store
//!
//! Append-only record sink shared by all workers of a run. The contract:
//! a record is atomically visible in full or not at all, sequence numbers
//! are assigned centrally per run (strictly increasing, contiguous), and
//! nothing is ever rewritten or deleted while a run is live. Contended
//! appends are retried with bounded exponential backoff by the caller;
//! exhaustion surfaces as a lost write, never as a run abort.

mod journal;
mod memory;

pub use journal::JournalStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::RunnerConfig;
use crate::error::StoreError;
use crate::models::{LogEntry, NewLogEntry, RunId};

/// Append-only record sink
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append one record; returns the assigned sequence number.
    ///
    /// May fail with `StoreError::Contended`, in which case the caller
    /// retries via [`append_with_retry`].
    async fn append(&self, entry: NewLogEntry) -> Result<u64, StoreError>;

    /// Read records with `seq >= from_seq`, in sequence order.
    /// May tail a non-terminal run; eventually consistent with appends.
    async fn read_from(&self, run_id: &RunId, from_seq: u64) -> Result<Vec<LogEntry>, StoreError>;

    /// All records of a run, in sequence order
    async fn entries(&self, run_id: &RunId) -> Result<Vec<LogEntry>, StoreError> {
        self.read_from(run_id, 0).await
    }

    /// Live tail of every append; receivers filter by run id
    fn subscribe(&self) -> broadcast::Receiver<LogEntry>;
}

/// Bounded exponential backoff for contended appends
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(
            Duration::from_millis(config.store_backoff_base_ms),
            config.store_max_attempts,
        )
    }

    /// Delay before the given retry attempt (0-based), doubling each
    /// time and capped at one second
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        (self.base * factor).min(Duration::from_secs(1))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), 5)
    }
}

/// Append with bounded retry on contention.
///
/// A failed append after exhausting the budget is returned as
/// `WriteFailure`; the caller records the loss and keeps the run going.
pub async fn append_with_retry(
    store: &dyn ResultStore,
    policy: &BackoffPolicy,
    entry: NewLogEntry,
) -> Result<u64, StoreError> {
    let mut attempt = 0u32;
    loop {
        match store.append(entry.clone()).await {
            Ok(seq) => return Ok(seq),
            Err(StoreError::Contended) | Err(StoreError::Io(_)) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!("store append failed after {attempt} attempts, record lost");
                    return Err(StoreError::WriteFailure { attempts: attempt });
                }
                let delay = policy.delay(attempt - 1);
                debug!("store contended, retrying in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store that reports contention for the first N appends
    struct ContendedStore {
        inner: MemoryStore,
        remaining: AtomicU32,
    }

    #[async_trait]
    impl ResultStore for ContendedStore {
        async fn append(&self, entry: NewLogEntry) -> Result<u64, StoreError> {
            if self.remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
            {
                return Err(StoreError::Contended);
            }
            self.inner.append(entry).await
        }

        async fn read_from(
            &self,
            run_id: &RunId,
            from_seq: u64,
        ) -> Result<Vec<LogEntry>, StoreError> {
            self.inner.read_from(run_id, from_seq).await
        }

        fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), 5);
        assert_eq!(policy.delay(0), Duration::from_millis(10));
        assert_eq!(policy.delay(1), Duration::from_millis(20));
        assert_eq!(policy.delay(2), Duration::from_millis(40));
        // capped
        assert_eq!(policy.delay(12), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_contention() {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            remaining: AtomicU32::new(2),
        };
        let policy = BackoffPolicy::new(Duration::from_millis(1), 5);
        let entry = NewLogEntry::info("r1".into(), "hello");
        let seq = append_with_retry(&store, &policy, entry).await.unwrap();
        assert_eq!(seq, 0);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let store = ContendedStore {
            inner: MemoryStore::new(),
            remaining: AtomicU32::new(100),
        };
        let policy = BackoffPolicy::new(Duration::from_millis(1), 3);
        let entry = NewLogEntry::info("r1".into(), "hello");
        match append_with_retry(&store, &policy, entry).await {
            Err(StoreError::WriteFailure { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected write failure, got {other:?}"),
        }
    }
}
