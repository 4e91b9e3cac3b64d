//! Run lifecycle models
//!
//! A run is one triggered execution of a resolved selection. Everything a
//! worker writes about a run is a `LogEntry`; the final rollup is a
//! `RunSummary`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::test_case::{Criticality, TestCase, TestCaseId};

/// Unique identifier of a run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Run category encoded into the run id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunCategory {
    #[default]
    Regression,
    Data,
}

impl RunCategory {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reg" | "regression" => Some(RunCategory::Regression),
            "data" => Some(RunCategory::Data),
            _ => None,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            RunCategory::Regression => "REG",
            RunCategory::Data => "DATA",
        }
    }
}

/// Target environment a run executes against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetEnv {
    Prod,
    Cert,
    Stage,
    #[default]
    NoEnv,
}

impl TargetEnv {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Some(TargetEnv::Prod),
            "cert" => Some(TargetEnv::Cert),
            "stage" | "staging" => Some(TargetEnv::Stage),
            "noenv" | "none" => Some(TargetEnv::NoEnv),
            _ => None,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            TargetEnv::Prod => "PROD",
            TargetEnv::Cert => "CERT",
            TargetEnv::Stage => "STAGE",
            TargetEnv::NoEnv => "NOENV",
        }
    }
}

impl fmt::Display for TargetEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// What a run executes: a single pack or an explicit case list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    FeaturePack(String),
    ComboPack(String),
    Cases(Vec<TestCaseId>),
}

impl Selection {
    /// Short label embedded in the run id
    pub fn label(&self) -> String {
        match self {
            Selection::FeaturePack(name) | Selection::ComboPack(name) => name.clone(),
            Selection::Cases(ids) => format!("Explicit{}", ids.len()),
        }
    }
}

/// Optional narrowing applied after a selection is flattened
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunFilters {
    /// Keep only cases carrying at least one of these feature tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Keep only cases at or above this criticality
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_criticality: Option<Criticality>,
}

impl RunFilters {
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.min_criticality.is_none()
    }

    /// True when the case survives the filters
    pub fn matches(&self, case: &TestCase) -> bool {
        if let Some(floor) = self.min_criticality {
            if case.criticality < floor {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| case.has_tag(t)) {
            return false;
        }
        true
    }
}

/// Immutable input to a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub selection: Selection,

    /// Worker pool size; 1 means fully serial
    pub parallelism: usize,

    pub environment: TargetEnv,

    #[serde(default)]
    pub category: RunCategory,

    #[serde(default)]
    pub filters: RunFilters,
}

impl RunRequest {
    pub fn new(selection: Selection) -> Self {
        Self {
            selection,
            parallelism: 1,
            environment: TargetEnv::default(),
            category: RunCategory::default(),
            filters: RunFilters::default(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_environment(mut self, environment: TargetEnv) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_category(mut self, category: RunCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_filters(mut self, filters: RunFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// Generate a run id: RTVS-<category>-<env>-<selection>-<timestamp>-<rand4>
pub fn generate_run_id(request: &RunRequest) -> RunId {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    RunId(format!(
        "RTVS-{}-{}-{}-{}-{random:04}",
        request.category.code(),
        request.environment.code(),
        request.selection.label(),
        timestamp
    ))
}

/// Run lifecycle state, transitions are monotonic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    PartiallyCompleted,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::PartiallyCompleted | RunStatus::Aborted
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "PENDING"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Completed => write!(f, "COMPLETED"),
            RunStatus::PartiallyCompleted => write!(f, "PARTIALLY_COMPLETED"),
            RunStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Pack membership graph captured when a run starts
///
/// Reports join results against this snapshot rather than the live
/// registry, so a summary stays reproducible from stored state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PackMembership {
    /// Feature packs each case belongs to
    pub features_of: BTreeMap<TestCaseId, Vec<String>>,

    /// Combo packs each case is reachable from
    pub combos_of: BTreeMap<TestCaseId, Vec<String>>,
}

/// One triggered execution of a resolved selection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub request: RunRequest,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Worker pool size actually used
    pub worker_count: usize,

    /// Resolved dispatch order
    pub resolved: Vec<TestCaseId>,

    /// Membership snapshot for reporting
    pub membership: PackMembership,

    /// Set the instant a stalled worker is detected
    pub degraded: bool,

    /// Case ids drained without dispatch on cancellation
    pub aborted_cases: Vec<TestCaseId>,

    /// Appends lost after retry exhaustion
    pub lost_writes: u64,
}

impl Run {
    pub fn new(id: RunId, request: RunRequest, resolved: Vec<TestCaseId>) -> Self {
        let worker_count = request.parallelism;
        Self {
            id,
            request,
            status: RunStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            worker_count,
            resolved,
            membership: PackMembership::default(),
            degraded: false,
            aborted_cases: Vec::new(),
            lost_writes: 0,
        }
    }

    /// Advance the lifecycle; backwards transitions are ignored
    pub fn advance(&mut self, next: RunStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = next;
        if next.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
    }
}

/// Worker slot index, rendered as `worker1`, `worker2`, ...
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker{}", self.0)
    }
}

/// Outcome of one test case execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Timeout,
    Error,
    Aborted,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Timeout => "⧖",
            TestStatus::Error => "!",
            TestStatus::Aborted => "○",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "PASSED"),
            TestStatus::Failed => write!(f, "FAILED"),
            TestStatus::Timeout => write!(f, "TIMEOUT"),
            TestStatus::Error => write!(f, "ERROR"),
            TestStatus::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Record kind in the run log
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Heartbeat,
    Info,
    /// The stall monitor stole a case from a silent worker
    StallDetected,
    TestCaseResult,
}

/// A record to append; the store assigns sequence number and timestamp
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub run_id: RunId,
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<TestCaseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Set on the closing record only, so the final run status survives
    /// in the journal without message parsing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<RunStatus>,
}

impl NewLogEntry {
    pub fn info(run_id: RunId, message: impl Into<String>) -> Self {
        Self {
            run_id,
            kind: LogKind::Info,
            test_case: None,
            status: None,
            message: message.into(),
            worker: None,
            duration_ms: None,
            run_status: None,
        }
    }

    pub fn heartbeat(run_id: RunId, worker: WorkerId, test_case: Option<TestCaseId>) -> Self {
        Self {
            run_id,
            kind: LogKind::Heartbeat,
            test_case,
            status: None,
            message: String::new(),
            worker: Some(worker),
            duration_ms: None,
            run_status: None,
        }
    }

    pub fn stall(run_id: RunId, worker: WorkerId, test_case: TestCaseId) -> Self {
        Self {
            run_id,
            kind: LogKind::StallDetected,
            message: format!("{worker} stalled while running {test_case}"),
            test_case: Some(test_case),
            status: None,
            worker: Some(worker),
            duration_ms: None,
            run_status: None,
        }
    }

    /// Closing record, appended once the run reaches a terminal status
    pub fn run_closed(run_id: RunId, status: RunStatus) -> Self {
        Self {
            run_id,
            kind: LogKind::Info,
            test_case: None,
            status: None,
            message: format!("run finished with status {status}"),
            worker: None,
            duration_ms: None,
            run_status: Some(status),
        }
    }

    pub fn result(
        run_id: RunId,
        test_case: TestCaseId,
        status: TestStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            run_id,
            kind: LogKind::TestCaseResult,
            test_case: Some(test_case),
            status: Some(status),
            message: message.into(),
            worker: None,
            duration_ms: None,
            run_status: None,
        }
    }

    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// A stored record, immutable once appended
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub run_id: RunId,

    /// Assigned centrally at append time, contiguous per run
    pub seq: u64,

    pub timestamp: DateTime<Utc>,
    pub kind: LogKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case: Option<TestCaseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_status: Option<RunStatus>,
}

impl LogEntry {
    /// Build the stored record from a draft plus assigned sequence
    pub fn from_new(new: NewLogEntry, seq: u64) -> Self {
        Self {
            run_id: new.run_id,
            seq,
            timestamp: Utc::now(),
            kind: new.kind,
            test_case: new.test_case,
            status: new.status,
            message: new.message,
            worker: new.worker,
            duration_ms: new.duration_ms,
            run_status: new.run_status,
        }
    }

    pub fn is_result(&self) -> bool {
        self.kind == LogKind::TestCaseResult
    }
}

/// Per-status tally of result records
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub timeout: usize,
    pub errors: usize,
    pub aborted: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Timeout => self.timeout += 1,
            TestStatus::Error => self.errors += 1,
            TestStatus::Aborted => self.aborted += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.timeout + self.errors + self.aborted
    }

    pub fn pass_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.passed as f64 / total as f64) * 100.0
        }
    }
}

/// Grouping axis for summaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    FeaturePack,
    ComboPack,
}

impl GroupBy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "feature" | "feature_pack" | "feature-pack" => Some(GroupBy::FeaturePack),
            "combo" | "combo_pack" | "combo-pack" => Some(GroupBy::ComboPack),
            _ => None,
        }
    }
}

/// Per-pack slice of a run summary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackBreakdown {
    pub name: String,
    pub counts: StatusCounts,
    pub duration_ms: u64,
}

/// Aggregated outcome of one run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub counts: StatusCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupBy>,
    #[serde(default)]
    pub groups: Vec<PackBreakdown>,
    pub total_duration_ms: u64,
    #[serde(default)]
    pub aborted_cases: Vec<TestCaseId>,
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RunRequest {
        RunRequest::new(Selection::ComboPack("Combo1".into()))
            .with_environment(TargetEnv::Stage)
            .with_parallelism(3)
    }

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id(&request());
        assert!(id.as_str().starts_with("RTVS-REG-STAGE-Combo1-"));
        assert_ne!(generate_run_id(&request()), generate_run_id(&request()));
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::PartiallyCompleted.is_terminal());
    }

    #[test]
    fn test_run_advance_is_monotonic() {
        let mut run = Run::new("r1".into(), request(), vec![]);
        run.advance(RunStatus::Running);
        run.advance(RunStatus::Completed);
        assert!(run.ended_at.is_some());

        // terminal state sticks
        run.advance(RunStatus::Aborted);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn test_filters_match() {
        let case = TestCase::new("T1")
            .with_tag("sidebar")
            .with_criticality(Criticality::High);

        let empty = RunFilters::default();
        assert!(empty.matches(&case));

        let by_tag = RunFilters {
            tags: vec!["analytics".into()],
            min_criticality: None,
        };
        assert!(!by_tag.matches(&case));

        let by_floor = RunFilters {
            tags: vec![],
            min_criticality: Some(Criticality::Critical),
        };
        assert!(!by_floor.matches(&case));
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.record(TestStatus::Passed);
        counts.record(TestStatus::Passed);
        counts.record(TestStatus::Timeout);
        counts.record(TestStatus::Aborted);
        assert_eq!(counts.total(), 4);
        assert_eq!(counts.pass_rate(), 50.0);
    }

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId(2).to_string(), "worker2");
    }
}
