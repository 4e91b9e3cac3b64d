//! In-memory result store
//!
//! Primary store for embedding and tests. A single mutex guards the
//! per-run logs, so every record becomes visible atomically and in
//! sequence order; appends are fanned out on a broadcast channel for
//! live tailing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::error::StoreError;
use crate::models::{LogEntry, NewLogEntry, RunId};

use super::ResultStore;

const TAIL_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct RunLog {
    next_seq: u64,
    entries: Vec<LogEntry>,
}

/// In-process append-only store
pub struct MemoryStore {
    runs: Mutex<HashMap<RunId, RunLog>>,
    tail: broadcast::Sender<LogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tail, _) = broadcast::channel(TAIL_CAPACITY);
        Self {
            runs: Mutex::new(HashMap::new()),
            tail,
        }
    }

    /// Number of records stored for a run
    pub fn len(&self, run_id: &RunId) -> usize {
        self.runs
            .lock()
            .expect("store mutex poisoned")
            .get(run_id)
            .map(|log| log.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, run_id: &RunId) -> bool {
        self.len(run_id) == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append(&self, entry: NewLogEntry) -> Result<u64, StoreError> {
        let stored = {
            let mut runs = self.runs.lock().expect("store mutex poisoned");
            let log = runs.entry(entry.run_id.clone()).or_default();
            let seq = log.next_seq;
            log.next_seq += 1;
            let stored = LogEntry::from_new(entry, seq);
            log.entries.push(stored.clone());
            stored
        };
        // dropped receivers are fine, tailing is best effort
        let seq = stored.seq;
        let _ = self.tail.send(stored);
        Ok(seq)
    }

    async fn read_from(&self, run_id: &RunId, from_seq: u64) -> Result<Vec<LogEntry>, StoreError> {
        let runs = self.runs.lock().expect("store mutex poisoned");
        Ok(runs
            .get(run_id)
            .map(|log| {
                log.entries
                    .iter()
                    .filter(|e| e.seq >= from_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tail.subscribe()
    }
}
