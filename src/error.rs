//! Error taxonomy for the orchestration core
//!
//! Resolution-time errors fail closed before any worker is dispatched.
//! Execution-time errors are contained per test case and never abort a
//! whole run; only total session exhaustion or total store failure
//! escalates to run level.

use thiserror::Error;

use crate::models::TestCaseId;

/// Errors surfaced by registry loading, validation and resolution
#[derive(Debug, Error)]
pub enum RtvsError {
    /// Malformed pack definitions; no run starts
    #[error("config error: {0}")]
    Config(String),

    /// Selection or reference names a pack that was never registered
    #[error("unknown pack: {0}")]
    UnknownPack(String),

    /// A pack reference does not resolve to a registered entity
    #[error("unknown reference `{reference}` in pack `{pack}`")]
    UnknownReference { pack: String, reference: String },

    /// Name collision within a namespace
    #[error("duplicate {namespace} name: {name}")]
    DuplicateName { namespace: &'static str, name: String },

    /// Combo pack references form a cycle; path names the cycle
    #[error("cyclic combo pack reference: {}", path.join(" -> "))]
    CyclicReference { path: Vec<String> },

    /// Mutation attempted after validate() froze the registry
    #[error("registry is frozen; reload requires a fresh registry")]
    RegistryFrozen,

    /// Selection names a case missing from the catalog
    #[error("unknown test case: {0}")]
    UnknownTestCase(TestCaseId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient contention, retried with backoff by the caller
    #[error("store contended, retry")]
    Contended,

    #[error("store i/o error: {0}")]
    Io(String),

    #[error("record serialization failed: {0}")]
    Serialize(String),

    /// Retry budget exhausted; the record is lost
    #[error("append failed after {attempts} attempts")]
    WriteFailure { attempts: u32 },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialize(err.to_string())
    }
}

/// Session provider failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session became available within the bounded wait
    #[error("session pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// Provider shut down while a worker was waiting
    #[error("session provider closed")]
    Closed,
}

/// Infrastructure fault reported by the external test executor
///
/// Ordinary test failures are not errors; the executor returns those as
/// a `Failed` outcome instead.
#[derive(Debug, Error)]
#[error("executor fault: {0}")]
pub struct ExecutorFault(pub String);

impl ExecutorFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_names_path() {
        let err = RtvsError::CyclicReference {
            path: vec!["Combo1".into(), "Combo2".into(), "Combo1".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic combo pack reference: Combo1 -> Combo2 -> Combo1"
        );
    }

    #[test]
    fn test_duplicate_name_message() {
        let err = RtvsError::DuplicateName {
            namespace: "feature pack",
            name: "SidebarPack".into(),
        };
        assert!(err.to_string().contains("SidebarPack"));
    }
}
