//! Data models for the orchestration core
//!
//! This module contains all data structures used throughout the crate.

mod pack;
mod run;
mod test_case;

pub use pack::{ComboPack, FeaturePack, PackRef};
pub use run::{
    generate_run_id, GroupBy, LogEntry, LogKind, NewLogEntry, PackBreakdown, PackMembership, Run,
    RunCategory, RunFilters, RunId, RunRequest, RunStatus, RunSummary, Selection, StatusCounts,
    TargetEnv, TestStatus, WorkerId,
};
pub use test_case::{AutomationStatus, Criticality, TestCase, TestCaseId};
