//! File-backed journal store
//!
//! Reference implementation of the store contract over append-only
//! JSON-lines files, one file per run. A record is one serialized line
//! written and flushed under the state lock, so readers observe it in
//! full or not at all. `append` never blocks on the lock; contention is
//! reported to the caller, which backs off and retries.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::models::{LogEntry, NewLogEntry, RunId};

use super::ResultStore;

const TAIL_CAPACITY: usize = 1024;

struct RunJournal {
    next_seq: u64,
    file: File,
}

/// Append-only JSON-lines store, one file per run
pub struct JournalStore {
    dir: PathBuf,
    state: Mutex<HashMap<RunId, RunJournal>>,
    tail: broadcast::Sender<LogEntry>,
}

impl JournalStore {
    /// Open (or create) a journal directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let (tail, _) = broadcast::channel(TAIL_CAPACITY);
        info!("journal store at {}", dir.display());
        Ok(Self {
            dir,
            state: Mutex::new(HashMap::new()),
            tail,
        })
    }

    /// Open under the platform data directory
    pub fn open_default() -> Result<Self, StoreError> {
        let dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rtvs")
            .join("journal");
        Self::open(dir)
    }

    /// Journal file for a run
    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.jsonl"))
    }

    /// Run ids present in the journal directory
    pub fn runs(&self) -> Result<Vec<RunId>, StoreError> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "jsonl").unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push(RunId(stem.to_string()));
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    fn open_run(&self, run_id: &RunId) -> Result<RunJournal, StoreError> {
        let path = self.path_for(run_id);
        let next_seq = if path.exists() {
            read_entries(&path, 0)?
                .last()
                .map(|e| e.seq + 1)
                .unwrap_or(0)
        } else {
            0
        };
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(RunJournal { next_seq, file })
    }
}

fn read_entries(path: &Path, from_seq: u64) -> Result<Vec<LogEntry>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogEntry>(&line) {
            Ok(entry) if entry.seq >= from_seq => entries.push(entry),
            Ok(_) => {}
            Err(err) => {
                // a torn trailing line from a crashed process is skipped,
                // everything before it is intact
                debug!("skipping malformed journal line: {err}");
            }
        }
    }
    Ok(entries)
}

#[async_trait]
impl ResultStore for JournalStore {
    async fn append(&self, entry: NewLogEntry) -> Result<u64, StoreError> {
        let stored = {
            let mut state = self.state.try_lock().map_err(|_| StoreError::Contended)?;
            if !state.contains_key(&entry.run_id) {
                let journal = self.open_run(&entry.run_id)?;
                state.insert(entry.run_id.clone(), journal);
            }
            let journal = state.get_mut(&entry.run_id).expect("journal just inserted");

            let stored = LogEntry::from_new(entry, journal.next_seq);
            let line = serde_json::to_string(&stored)?;
            writeln!(journal.file, "{line}")?;
            journal.file.flush()?;
            journal.next_seq += 1;
            stored
        };
        let seq = stored.seq;
        let _ = self.tail.send(stored);
        Ok(seq)
    }

    async fn read_from(&self, run_id: &RunId, from_seq: u64) -> Result<Vec<LogEntry>, StoreError> {
        read_entries(&self.path_for(run_id), from_seq)
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tail.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{append_with_retry, BackoffPolicy};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_append_and_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let run: RunId = "RTVS-REG-NOENV-Smoke-20240101_000000-0001".into();

        for i in 0..3 {
            let seq = store
                .append(NewLogEntry::info(run.clone(), format!("m{i}")))
                .await
                .unwrap();
            assert_eq!(seq, i);
        }

        let entries = store.entries(&run).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].message, "m2");
    }

    #[tokio::test]
    async fn test_seq_recovered_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let run: RunId = "r1".into();
        {
            let store = JournalStore::open(dir.path()).unwrap();
            store
                .append(NewLogEntry::info(run.clone(), "first"))
                .await
                .unwrap();
        }
        let store = JournalStore::open(dir.path()).unwrap();
        let seq = store
            .append(NewLogEntry::info(run.clone(), "second"))
            .await
            .unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn test_torn_trailing_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        let run: RunId = "r1".into();
        store
            .append(NewLogEntry::info(run.clone(), "good"))
            .await
            .unwrap();

        // simulate a crash mid-write
        let path = store.path_for(&run);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"run_id\":\"r1\",\"seq\":1,").unwrap();

        let entries = store.entries(&run).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "good");
    }

    #[tokio::test]
    async fn test_concurrent_writers_with_retry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JournalStore::open(dir.path()).unwrap());
        let run: RunId = "r1".into();
        let policy = BackoffPolicy::new(std::time::Duration::from_millis(1), 50);

        let mut handles = Vec::new();
        for w in 0..4 {
            let store = store.clone();
            let run = run.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..10 {
                    let entry = NewLogEntry::info(run.clone(), format!("w{w}m{i}"));
                    append_with_retry(store.as_ref(), &policy, entry)
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = store.entries(&run).await.unwrap();
        assert_eq!(entries.len(), 40);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.seq, i as u64);
        }
    }

    #[tokio::test]
    async fn test_runs_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::open(dir.path()).unwrap();
        store
            .append(NewLogEntry::info("r-b".into(), "x"))
            .await
            .unwrap();
        store
            .append(NewLogEntry::info("r-a".into(), "y"))
            .await
            .unwrap();
        let runs = store.runs().unwrap();
        assert_eq!(runs, vec![RunId("r-a".into()), RunId("r-b".into())]);
    }
}
