//! Execution sessions
//!
//! A session is a leased execution resource (a browser instance, in the
//! surrounding product) used by exactly one worker at a time. The
//! provider is an external collaborator behind a narrow contract;
//! `FixedSessionPool` is the bounded in-process implementation.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::SessionError;

/// Opaque handle to a leased execution resource
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Session {
    pub id: u64,
    pub label: String,
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

/// Bounded pool handing out execution sessions
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Block for a session, up to the given bound
    async fn acquire(&self, wait: Duration) -> Result<Session, SessionError>;

    /// Return a healthy session to the pool
    async fn release(&self, session: Session);

    /// Drop a session known to be corrupted (timeout, crash, stall);
    /// the provider replaces it with a fresh one
    async fn discard(&self, session: Session);

    fn capacity(&self) -> usize;
}

/// Fixed-capacity session pool
pub struct FixedSessionPool {
    capacity: usize,
    permits: Semaphore,
    // oldest idle session is leased first
    idle: Mutex<VecDeque<Session>>,
    next_id: AtomicU64,
    discarded: AtomicU64,
}

impl FixedSessionPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let idle = (1..=capacity)
            .map(|i| Session {
                id: i as u64,
                label: format!("session{i}"),
            })
            .collect();
        Self {
            capacity,
            permits: Semaphore::new(capacity),
            idle: Mutex::new(idle),
            next_id: AtomicU64::new(capacity as u64 + 1),
            discarded: AtomicU64::new(0),
        }
    }

    /// Sessions discarded as corrupted over the pool lifetime
    pub fn discarded_count(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn mint(&self) -> Session {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Session {
            id,
            label: format!("session{id}"),
        }
    }
}

#[async_trait]
impl SessionProvider for FixedSessionPool {
    async fn acquire(&self, wait: Duration) -> Result<Session, SessionError> {
        match timeout(wait, self.permits.acquire()).await {
            Err(_) => Err(SessionError::PoolExhausted {
                waited_ms: wait.as_millis() as u64,
            }),
            Ok(Err(_)) => Err(SessionError::Closed),
            Ok(Ok(permit)) => {
                // the permit count mirrors the idle list exactly
                permit.forget();
                let session = self
                    .idle
                    .lock()
                    .expect("pool mutex poisoned")
                    .pop_front()
                    .expect("permit held without idle session");
                debug!("leased {session}");
                Ok(session)
            }
        }
    }

    async fn release(&self, session: Session) {
        debug!("released {session}");
        self.idle
            .lock()
            .expect("pool mutex poisoned")
            .push_back(session);
        self.permits.add_permits(1);
    }

    async fn discard(&self, session: Session) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        let fresh = self.mint();
        info!("discarded corrupted {session}, replaced by {fresh}");
        self.idle
            .lock()
            .expect("pool mutex poisoned")
            .push_back(fresh);
        self.permits.add_permits(1);
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_release_cycle() {
        let pool = FixedSessionPool::new(2);
        let a = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let b = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(a.label, "session1");
        assert_eq!(b.label, "session2");

        // the oldest idle session comes back first
        pool.release(a).await;
        let c = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(c.label, "session1");
        pool.release(b).await;
        pool.release(c).await;
    }

    #[tokio::test]
    async fn test_exhausted_pool_times_out() {
        let pool = FixedSessionPool::new(1);
        let _held = pool.acquire(Duration::from_millis(50)).await.unwrap();
        match pool.acquire(Duration::from_millis(20)).await {
            Err(SessionError::PoolExhausted { waited_ms }) => assert_eq!(waited_ms, 20),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_discard_mints_replacement() {
        let pool = FixedSessionPool::new(1);
        let stale = pool.acquire(Duration::from_millis(50)).await.unwrap();
        let stale_id = stale.id;
        pool.discard(stale).await;

        let fresh = pool.acquire(Duration::from_millis(50)).await.unwrap();
        assert_ne!(fresh.id, stale_id);
        assert_eq!(pool.discarded_count(), 1);
    }
}
