//! Feature and combo pack models
//!
//! A feature pack is a curated, ordered set of test case ids for one
//! feature. A combo pack composes feature packs, other combo packs and
//! loose case ids into one selectable unit.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::test_case::{Criticality, TestCaseId};

/// Named, ordered set of test case ids covering one feature
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePack {
    /// Unique name within the feature pack namespace
    pub name: String,

    /// Member case ids, insertion order significant
    pub cases: Vec<TestCaseId>,

    /// Cases below this criticality are dropped at resolution time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality_floor: Option<Criticality>,
}

impl FeaturePack {
    pub fn new(name: impl Into<String>, cases: Vec<TestCaseId>) -> Self {
        Self {
            name: name.into(),
            cases,
            criticality_floor: None,
        }
    }

    pub fn with_floor(mut self, floor: Criticality) -> Self {
        self.criticality_floor = Some(floor);
        self
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// One reference inside a combo pack
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackRef {
    /// Reference to a feature pack by name
    Feature(String),
    /// Reference to another combo pack by name (nesting permitted)
    Combo(String),
    /// A raw test case id
    Case(TestCaseId),
}

impl fmt::Display for PackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackRef::Feature(name) => write!(f, "feature:{name}"),
            PackRef::Combo(name) => write!(f, "combo:{name}"),
            PackRef::Case(id) => write!(f, "case:{id}"),
        }
    }
}

/// Named composition of packs and loose case ids
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboPack {
    /// Unique name within the combo pack namespace
    pub name: String,

    /// References resolved depth-first in declaration order
    pub refs: Vec<PackRef>,
}

impl ComboPack {
    pub fn new(name: impl Into<String>, refs: Vec<PackRef>) -> Self {
        Self {
            name: name.into(),
            refs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_pack_order_preserved() {
        let pack = FeaturePack::new(
            "SidebarPack",
            vec!["T1".into(), "T2".into(), "T3".into()],
        );
        let ids: Vec<&str> = pack.cases.iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, ["T1", "T2", "T3"]);
    }

    #[test]
    fn test_pack_ref_display() {
        assert_eq!(PackRef::Feature("Sidebar".into()).to_string(), "feature:Sidebar");
        assert_eq!(PackRef::Combo("Combo1".into()).to_string(), "combo:Combo1");
        assert_eq!(
            PackRef::Case(TestCaseId::new("T9")).to_string(),
            "case:T9"
        );
    }
}
