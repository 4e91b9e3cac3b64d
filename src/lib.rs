//! RTVS core - regression test run orchestration
//!
//! Holds the pack catalog, resolves selections into a dispatch order,
//! drives a bounded worker pool over a session lease, and records every
//! result in an append-only store that summaries are computed from.
//!
//! ## Layout
//!
//! - [`registry`] - test case and pack catalog, frozen after validation
//! - [`executor`] - orchestrator, worker pool, heartbeats and watchdogs
//! - [`session`] - bounded session leasing for external test drivers
//! - [`store`] - append-only run records, in memory or on disk
//! - [`report`] - summaries computed from stored records

pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod models;
pub mod registry;
pub mod report;
pub mod session;
pub mod store;

pub use error::{ExecutorFault, RtvsError, SessionError, StoreError};
pub use executor::{ExecutionOutcome, Orchestrator, TestExecutor};
pub use registry::{ComboResolver, PackRegistry};
pub use session::{FixedSessionPool, Session, SessionProvider};
pub use store::{JournalStore, MemoryStore, ResultStore};
