//! Test case catalog models
//!
//! Defines the immutable test case record and its classification axes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Unique identifier of a test case
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCaseId(pub String);

impl TestCaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TestCaseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Criticality of a test case, ordered from least to most critical
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Criticality {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Criticality::Low),
            "medium" => Some(Criticality::Medium),
            "high" => Some(Criticality::High),
            "critical" => Some(Criticality::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Criticality::Low => write!(f, "low"),
            Criticality::Medium => write!(f, "medium"),
            Criticality::High => write!(f, "high"),
            Criticality::Critical => write!(f, "critical"),
        }
    }
}

/// Whether a case can be dispatched to a worker or needs a human
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    #[default]
    Automated,
    Manual,
}

impl AutomationStatus {
    pub fn is_automated(&self) -> bool {
        matches!(self, AutomationStatus::Automated)
    }
}

/// A registered test case, immutable once the registry is frozen
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique id within the catalog
    pub id: TestCaseId,

    /// Feature tags used by run filters
    #[serde(default)]
    pub feature_tags: BTreeSet<String>,

    /// Criticality level
    #[serde(default)]
    pub criticality: Criticality,

    /// Automated or manual
    #[serde(default)]
    pub automation: AutomationStatus,

    /// Owning engineer or team
    #[serde(default)]
    pub owner: Option<String>,
}

impl TestCase {
    pub fn new(id: impl Into<TestCaseId>) -> Self {
        Self {
            id: id.into(),
            feature_tags: BTreeSet::new(),
            criticality: Criticality::default(),
            automation: AutomationStatus::default(),
            owner: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.feature_tags.insert(tag.into());
        self
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    pub fn with_automation(mut self, automation: AutomationStatus) -> Self {
        self.automation = automation;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// True when the case carries the given feature tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.feature_tags.contains(tag)
    }
}

impl From<&str> for TestCase {
    fn from(id: &str) -> Self {
        TestCase::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_criticality_ordering() {
        assert!(Criticality::Low < Criticality::Medium);
        assert!(Criticality::High < Criticality::Critical);
    }

    #[test]
    fn test_criticality_from_str() {
        assert_eq!(Criticality::from_str("HIGH"), Some(Criticality::High));
        assert_eq!(Criticality::from_str("critical"), Some(Criticality::Critical));
        assert_eq!(Criticality::from_str("unknown"), None);
    }

    #[test]
    fn test_case_builder() {
        let case = TestCase::new("login_splash")
            .with_tag("login")
            .with_criticality(Criticality::Critical)
            .with_owner("qa-core");

        assert_eq!(case.id.as_str(), "login_splash");
        assert!(case.has_tag("login"));
        assert!(!case.has_tag("dashboard"));
        assert_eq!(case.owner.as_deref(), Some("qa-core"));
        assert!(case.automation.is_automated());
    }
}
