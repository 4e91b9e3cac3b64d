//! Summary reports over stored run records
//!
//! A summary is computed purely from the result records and the pack
//! membership snapshot taken when the run started, so the same stored
//! run always reproduces the same report, live registry or not.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{RtvsError, StoreError};
use crate::models::{
    GroupBy, LogEntry, LogKind, PackBreakdown, PackMembership, Run, RunId, RunStatus, RunSummary,
    StatusCounts, TestCaseId, TestStatus,
};

/// Name used for cases that belong to no pack on the chosen axis, so
/// group totals still reconcile with the overall counts
pub const UNGROUPED: &str = "(ungrouped)";

/// Final per-case outcomes, last record winning for a requeued case
fn final_outcomes(entries: &[LogEntry]) -> BTreeMap<TestCaseId, (TestStatus, u64)> {
    let mut outcomes = BTreeMap::new();
    for entry in entries {
        if entry.kind != LogKind::TestCaseResult {
            continue;
        }
        if let (Some(case), Some(status)) = (entry.test_case.clone(), entry.status) {
            outcomes.insert(case, (status, entry.duration_ms.unwrap_or(0)));
        }
    }
    outcomes
}

fn packs_for<'a>(
    membership: &'a PackMembership,
    group_by: GroupBy,
    case: &TestCaseId,
) -> Option<&'a Vec<String>> {
    match group_by {
        GroupBy::FeaturePack => membership.features_of.get(case),
        GroupBy::ComboPack => membership.combos_of.get(case),
    }
}

fn group_breakdowns(
    outcomes: &BTreeMap<TestCaseId, (TestStatus, u64)>,
    membership: &PackMembership,
    axis: GroupBy,
) -> Vec<PackBreakdown> {
    let mut buckets: BTreeMap<String, (StatusCounts, u64)> = BTreeMap::new();
    for (case, (status, duration)) in outcomes {
        let names = packs_for(membership, axis, case)
            .filter(|names| !names.is_empty())
            .cloned()
            .unwrap_or_else(|| vec![UNGROUPED.to_string()]);
        for name in names {
            let bucket = buckets.entry(name).or_default();
            bucket.0.record(*status);
            bucket.1 += duration;
        }
    }
    buckets
        .into_iter()
        .map(|(name, (counts, duration_ms))| PackBreakdown {
            name,
            counts,
            duration_ms,
        })
        .collect()
}

/// Build the aggregate summary for a run from its stored records
pub fn summarize(run: &Run, entries: &[LogEntry], group_by: Option<GroupBy>) -> RunSummary {
    let outcomes = final_outcomes(entries);

    let mut counts = StatusCounts::default();
    for (status, _) in outcomes.values() {
        counts.record(*status);
    }

    let total_duration_ms = match run.ended_at {
        Some(ended) => (ended - run.started_at).num_milliseconds().max(0) as u64,
        None => outcomes.values().map(|(_, d)| d).sum(),
    };

    let groups = group_by
        .map(|axis| group_breakdowns(&outcomes, &run.membership, axis))
        .unwrap_or_default();

    RunSummary {
        run_id: run.id.clone(),
        status: run.status,
        counts,
        group_by,
        groups,
        total_duration_ms,
        aborted_cases: run.aborted_cases.clone(),
        degraded: run.degraded,
    }
}

/// The scheduler closes every run with a record carrying the final
/// status; replaying a stored run recovers it from there
fn stored_status(entries: &[LogEntry], counts: &StatusCounts) -> RunStatus {
    for entry in entries.iter().rev() {
        if let Some(status) = entry.run_status {
            return status;
        }
    }
    // no closing record, fall back to what the results imply
    if counts.aborted > 0 {
        RunStatus::PartiallyCompleted
    } else {
        RunStatus::Completed
    }
}

/// Summarize a run straight from stored records, for reporting after
/// the orchestrator process is gone. Membership comes from a catalog
/// snapshot; grouping without one lumps everything under [`UNGROUPED`].
pub fn summarize_stored(
    run_id: RunId,
    entries: &[LogEntry],
    membership: &PackMembership,
    group_by: Option<GroupBy>,
) -> RunSummary {
    let outcomes = final_outcomes(entries);

    let mut counts = StatusCounts::default();
    let mut aborted_cases = Vec::new();
    for (case, (status, _)) in &outcomes {
        counts.record(*status);
        if *status == TestStatus::Aborted {
            aborted_cases.push(case.clone());
        }
    }

    let status = stored_status(entries, &counts);
    let degraded = entries.iter().any(|e| e.kind == LogKind::StallDetected);

    let groups = group_by
        .map(|axis| group_breakdowns(&outcomes, membership, axis))
        .unwrap_or_default();

    RunSummary {
        run_id,
        status,
        counts,
        group_by,
        groups,
        total_duration_ms: outcomes.values().map(|(_, d)| d).sum(),
        aborted_cases,
        degraded,
    }
}

/// Plain-text rendering for the terminal
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!("Run:      {}\n", summary.run_id));
    out.push_str(&format!("Status:   {}", summary.status));
    if summary.degraded {
        out.push_str(" (degraded)");
    }
    out.push('\n');
    out.push_str(&format!(
        "Results:  {} total | {} passed, {} failed, {} timeout, {} error, {} aborted\n",
        summary.counts.total(),
        summary.counts.passed,
        summary.counts.failed,
        summary.counts.timeout,
        summary.counts.errors,
        summary.counts.aborted,
    ));
    out.push_str(&format!("Pass rate: {:.1}%\n", summary.counts.pass_rate()));
    out.push_str(&format!(
        "Duration: {:.1}s\n",
        summary.total_duration_ms as f64 / 1000.0
    ));

    if !summary.groups.is_empty() {
        let axis = match summary.group_by {
            Some(GroupBy::FeaturePack) => "feature pack",
            Some(GroupBy::ComboPack) => "combo pack",
            None => "pack",
        };
        out.push_str(&format!("\nBy {axis}:\n"));
        for group in &summary.groups {
            out.push_str(&format!(
                "  {:<24} {:>3}/{:<3} passed  {:>6.1}s\n",
                group.name,
                group.counts.passed,
                group.counts.total(),
                group.duration_ms as f64 / 1000.0,
            ));
        }
    }

    if !summary.aborted_cases.is_empty() {
        out.push_str("\nAborted without dispatch:\n");
        for case in &summary.aborted_cases {
            out.push_str(&format!("  {case}\n"));
        }
    }
    out
}

#[derive(Serialize)]
struct CsvRow<'a> {
    case: &'a str,
    status: String,
    duration_ms: u64,
    worker: String,
    message: &'a str,
}

/// Per-case result rows as CSV, for spreadsheet handoff
pub fn results_csv(entries: &[LogEntry]) -> Result<String, RtvsError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for entry in entries {
        if entry.kind != LogKind::TestCaseResult {
            continue;
        }
        let (case, status) = match (&entry.test_case, entry.status) {
            (Some(case), Some(status)) => (case, status),
            _ => continue,
        };
        writer
            .serialize(CsvRow {
                case: &case.0,
                status: status.to_string(),
                duration_ms: entry.duration_ms.unwrap_or(0),
                worker: entry
                    .worker
                    .map(|w| w.to_string())
                    .unwrap_or_default(),
                message: &entry.message,
            })
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| StoreError::Serialize(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Serialize(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewLogEntry, RunId, RunRequest, RunStatus, Selection, WorkerId};

    fn entry(run_id: &RunId, seq: u64, case: &str, status: TestStatus, ms: u64) -> LogEntry {
        LogEntry::from_new(
            NewLogEntry::result(run_id.clone(), TestCaseId::from(case), status, "")
                .with_worker(WorkerId(1))
                .with_duration_ms(ms),
            seq,
        )
    }

    fn run_with_membership() -> Run {
        let id = RunId("RTVS-REG-NOENV-Sidebar-20260830_120000-0042".to_string());
        let request = RunRequest::new(Selection::FeaturePack("Sidebar".to_string()));
        let mut run = Run::new(
            id,
            request,
            vec![
                TestCaseId::from("t1"),
                TestCaseId::from("t2"),
                TestCaseId::from("t3"),
            ],
        );
        run.membership.features_of.insert(
            TestCaseId::from("t1"),
            vec!["Sidebar".to_string()],
        );
        run.membership.features_of.insert(
            TestCaseId::from("t2"),
            vec!["Sidebar".to_string(), "Analytics".to_string()],
        );
        run.advance(RunStatus::Running);
        run.advance(RunStatus::Completed);
        run
    }

    #[test]
    fn test_counts_and_pass_rate() {
        let run = run_with_membership();
        let entries = vec![
            entry(&run.id, 0, "t1", TestStatus::Passed, 100),
            entry(&run.id, 1, "t2", TestStatus::Failed, 200),
            entry(&run.id, 2, "t3", TestStatus::Timeout, 300),
        ];
        let summary = summarize(&run, &entries, None);
        assert_eq!(summary.counts.total(), 3);
        assert_eq!(summary.counts.passed, 1);
        assert_eq!(summary.counts.failed, 1);
        assert_eq!(summary.counts.timeout, 1);
        assert!(summary.groups.is_empty());
    }

    #[test]
    fn test_last_record_wins_for_retried_case() {
        let run = run_with_membership();
        let entries = vec![
            entry(&run.id, 0, "t1", TestStatus::Error, 50),
            entry(&run.id, 1, "t1", TestStatus::Passed, 80),
        ];
        let summary = summarize(&run, &entries, None);
        assert_eq!(summary.counts.total(), 1);
        assert_eq!(summary.counts.passed, 1);
        assert_eq!(summary.counts.errors, 0);
    }

    #[test]
    fn test_grouping_by_feature_pack_uses_snapshot() {
        let run = run_with_membership();
        let entries = vec![
            entry(&run.id, 0, "t1", TestStatus::Passed, 100),
            entry(&run.id, 1, "t2", TestStatus::Failed, 200),
            entry(&run.id, 2, "t3", TestStatus::Passed, 40),
        ];
        let summary = summarize(&run, &entries, Some(GroupBy::FeaturePack));

        let names: Vec<&str> = summary.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec![UNGROUPED, "Analytics", "Sidebar"]);

        let sidebar = summary.groups.iter().find(|g| g.name == "Sidebar").unwrap();
        assert_eq!(sidebar.counts.passed, 1);
        assert_eq!(sidebar.counts.failed, 1);
        assert_eq!(sidebar.duration_ms, 300);

        // t2 belongs to both packs and is counted in each
        let analytics = summary
            .groups
            .iter()
            .find(|g| g.name == "Analytics")
            .unwrap();
        assert_eq!(analytics.counts.failed, 1);

        // t3 has no membership and lands in the ungrouped bucket
        let ungrouped = summary.groups.iter().find(|g| g.name == UNGROUPED).unwrap();
        assert_eq!(ungrouped.counts.passed, 1);
    }

    #[test]
    fn test_heartbeats_and_info_are_ignored() {
        let run = run_with_membership();
        let entries = vec![
            LogEntry::from_new(
                NewLogEntry::heartbeat(run.id.clone(), WorkerId(1), Some(TestCaseId::from("t1"))),
                0,
            ),
            LogEntry::from_new(NewLogEntry::info(run.id.clone(), "run started"), 1),
            entry(&run.id, 2, "t1", TestStatus::Passed, 10),
        ];
        let summary = summarize(&run, &entries, None);
        assert_eq!(summary.counts.total(), 1);
    }

    #[test]
    fn test_render_text_mentions_degraded_and_aborted() {
        let mut run = run_with_membership();
        run.degraded = true;
        run.aborted_cases.push(TestCaseId::from("t9"));
        let entries = vec![entry(&run.id, 0, "t1", TestStatus::Passed, 10)];
        let summary = summarize(&run, &entries, None);
        let text = render_text(&summary);
        assert!(text.contains("degraded"));
        assert!(text.contains("t9"));
        assert!(text.contains("100.0%"));
    }

    #[test]
    fn test_results_csv_rows() {
        let run = run_with_membership();
        let entries = vec![
            LogEntry::from_new(NewLogEntry::info(run.id.clone(), "run started"), 0),
            entry(&run.id, 1, "t1", TestStatus::Passed, 120),
            entry(&run.id, 2, "t2", TestStatus::Failed, 340),
        ];
        let csv = results_csv(&entries).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "case,status,duration_ms,worker,message"
        );
        assert_eq!(lines.next().unwrap(), "t1,PASSED,120,worker1,");
        assert_eq!(lines.next().unwrap(), "t2,FAILED,340,worker1,");
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_summarize_stored_recovers_status_from_closing_record() {
        let run_id = RunId("RTVS-DATA-CERT-Nightly-20260830_010000-0007".to_string());
        let entries = vec![
            entry(&run_id, 0, "t1", TestStatus::Passed, 20),
            entry(&run_id, 1, "t2", TestStatus::Aborted, 0),
            LogEntry::from_new(
                NewLogEntry::run_closed(run_id.clone(), RunStatus::PartiallyCompleted),
                2,
            ),
        ];
        let summary =
            summarize_stored(run_id, &entries, &PackMembership::default(), None);
        assert_eq!(summary.status, RunStatus::PartiallyCompleted);
        assert_eq!(summary.aborted_cases, vec![TestCaseId::from("t2")]);
        assert_eq!(summary.total_duration_ms, 20);
        assert!(!summary.degraded);
    }

    #[test]
    fn test_degraded_comes_from_stall_records_not_message_text() {
        let run_id = RunId("RTVS-REG-NOENV-Install-20260830_020000-0011".to_string());
        // a case name mentioning "stalled" must not flip the flag
        let entries = vec![
            LogEntry::from_new(
                NewLogEntry::info(run_id.clone(), "uninstalled_widget is not automated"),
                0,
            ),
            entry(&run_id, 1, "t1", TestStatus::Passed, 10),
            LogEntry::from_new(
                NewLogEntry::run_closed(run_id.clone(), RunStatus::Completed),
                2,
            ),
        ];
        let summary =
            summarize_stored(run_id.clone(), &entries, &PackMembership::default(), None);
        assert!(!summary.degraded);
        assert_eq!(summary.status, RunStatus::Completed);

        let with_stall = vec![
            LogEntry::from_new(
                NewLogEntry::stall(run_id.clone(), WorkerId(2), TestCaseId::from("t1")),
                0,
            ),
            entry(&run_id, 1, "t1", TestStatus::Passed, 10),
        ];
        let summary =
            summarize_stored(run_id, &with_stall, &PackMembership::default(), None);
        assert!(summary.degraded);
    }

    #[test]
    fn test_summary_serializes_for_json_output() {
        let run = run_with_membership();
        let entries = vec![entry(&run.id, 0, "t1", TestStatus::Passed, 10)];
        let summary = summarize(&run, &entries, Some(GroupBy::FeaturePack));
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"passed\":1"));
        assert!(json.contains("Sidebar"));
    }
}
