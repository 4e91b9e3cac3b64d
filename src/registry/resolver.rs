//! Combo pack resolution
//!
//! Flattens a combo pack into a deduplicated, ordered list of test case
//! ids: depth-first in declaration order, first occurrence wins. Cycles
//! are detected with a visiting set and reported with the full path.
//! Resolutions are memoized, so a combo referenced from several places
//! is resolved at most once per resolver (one resolver per run).

use std::collections::{HashMap, HashSet};

use crate::error::RtvsError;
use crate::models::{FeaturePack, PackRef, RunFilters, Selection, TestCaseId};

use super::PackRegistry;

/// Per-run combo resolver with memoization
pub struct ComboResolver<'a> {
    registry: &'a PackRegistry,
    cache: HashMap<String, Vec<TestCaseId>>,
}

impl<'a> ComboResolver<'a> {
    pub fn new(registry: &'a PackRegistry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
        }
    }

    /// Resolve a combo pack to its flattened, deduplicated case list
    pub fn resolve(&mut self, name: &str) -> Result<Vec<TestCaseId>, RtvsError> {
        let mut path = Vec::new();
        self.resolve_inner(name, &mut path)
    }

    /// Resolve a run selection, then apply run filters
    pub fn resolve_selection(
        &mut self,
        selection: &Selection,
        filters: &RunFilters,
    ) -> Result<Vec<TestCaseId>, RtvsError> {
        let mut ids = match selection {
            Selection::FeaturePack(name) => {
                let pack = self
                    .registry
                    .feature_pack(name)
                    .ok_or_else(|| RtvsError::UnknownPack(name.clone()))?;
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for id in self.floor_filtered(pack) {
                    push_unique(&mut out, &mut seen, id);
                }
                out
            }
            Selection::ComboPack(name) => self.resolve(name)?,
            Selection::Cases(ids) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for id in ids {
                    if self.registry.case(id).is_none() {
                        return Err(RtvsError::UnknownTestCase(id.clone()));
                    }
                    push_unique(&mut out, &mut seen, id.clone());
                }
                out
            }
        };

        if !filters.is_empty() {
            ids.retain(|id| {
                self.registry
                    .case(id)
                    .map(|case| filters.matches(case))
                    .unwrap_or(false)
            });
        }

        Ok(ids)
    }

    fn resolve_inner(
        &mut self,
        name: &str,
        path: &mut Vec<String>,
    ) -> Result<Vec<TestCaseId>, RtvsError> {
        if let Some(hit) = self.cache.get(name) {
            return Ok(hit.clone());
        }
        if path.iter().any(|p| p == name) {
            let mut cycle = path.clone();
            cycle.push(name.to_string());
            return Err(RtvsError::CyclicReference { path: cycle });
        }

        let combo = self
            .registry
            .combo_pack(name)
            .ok_or_else(|| RtvsError::UnknownPack(name.to_string()))?;

        path.push(name.to_string());
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for r in &combo.refs {
            match r {
                PackRef::Feature(feature) => {
                    let pack = self
                        .registry
                        .feature_pack(feature)
                        .ok_or_else(|| RtvsError::UnknownPack(feature.clone()))?;
                    for id in self.floor_filtered(pack) {
                        push_unique(&mut out, &mut seen, id);
                    }
                }
                PackRef::Combo(nested) => {
                    for id in self.resolve_inner(nested, path)? {
                        push_unique(&mut out, &mut seen, id);
                    }
                }
                PackRef::Case(id) => {
                    if self.registry.case(id).is_none() {
                        return Err(RtvsError::UnknownTestCase(id.clone()));
                    }
                    push_unique(&mut out, &mut seen, id.clone());
                }
            }
        }

        path.pop();
        self.cache.insert(name.to_string(), out.clone());
        Ok(out)
    }

    /// Member ids surviving the pack's criticality floor
    fn floor_filtered(&self, pack: &FeaturePack) -> Vec<TestCaseId> {
        pack.cases
            .iter()
            .filter(|id| match pack.criticality_floor {
                Some(floor) => self
                    .registry
                    .case(id)
                    .map(|case| case.criticality >= floor)
                    .unwrap_or(false),
                None => true,
            })
            .cloned()
            .collect()
    }
}

fn push_unique(out: &mut Vec<TestCaseId>, seen: &mut HashSet<TestCaseId>, id: TestCaseId) {
    if seen.insert(id.clone()) {
        out.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComboPack, Criticality, TestCase};

    fn registry() -> PackRegistry {
        let mut registry = PackRegistry::new();
        for id in ["T1", "T2", "T3", "T4"] {
            registry.register(TestCase::new(id)).unwrap();
        }
        registry
            .register(TestCase::new("T5").with_criticality(Criticality::Low))
            .unwrap();
        registry
            .register_feature_pack(FeaturePack::new("Sidebar", vec!["T1".into(), "T2".into()]))
            .unwrap();
        registry
            .register_feature_pack(FeaturePack::new("Analytics", vec!["T2".into(), "T3".into()]))
            .unwrap();
        registry
            .register_feature_pack(
                FeaturePack::new("Payments", vec!["T4".into(), "T5".into()])
                    .with_floor(Criticality::Medium),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_overlap_dedup_first_occurrence_order() {
        let reg = {
            let mut r = registry();
            r.register_combo_pack(ComboPack::new(
                "Combo1",
                vec![
                    PackRef::Feature("Sidebar".into()),
                    PackRef::Feature("Analytics".into()),
                ],
            ))
            .unwrap();
            r
        };
        let mut resolver = ComboResolver::new(&reg);
        let resolved = resolver.resolve("Combo1").unwrap();
        let ids: Vec<&str> = resolved.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(ids, ["T1", "T2", "T3"]);
    }

    #[test]
    fn test_nested_combo_and_raw_case() {
        let reg = {
            let mut r = registry();
            r.register_combo_pack(ComboPack::new(
                "Inner",
                vec![PackRef::Feature("Analytics".into())],
            ))
            .unwrap();
            r.register_combo_pack(ComboPack::new(
                "Outer",
                vec![
                    PackRef::Combo("Inner".into()),
                    PackRef::Case("T1".into()),
                    PackRef::Case("T2".into()),
                ],
            ))
            .unwrap();
            r
        };
        let mut resolver = ComboResolver::new(&reg);
        let resolved = resolver.resolve("Outer").unwrap();
        let ids: Vec<&str> = resolved.iter().map(|c| c.0.as_str()).collect();
        assert_eq!(ids, ["T2", "T3", "T1"]);
    }

    #[test]
    fn test_criticality_floor_applied_before_flatten() {
        let reg = {
            let mut r = registry();
            r.register_combo_pack(ComboPack::new(
                "Combo",
                vec![PackRef::Feature("Payments".into())],
            ))
            .unwrap();
            r
        };
        let mut resolver = ComboResolver::new(&reg);
        let ids = resolver.resolve("Combo").unwrap();
        assert_eq!(ids, vec![TestCaseId::new("T4")]);
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let reg = {
            let mut r = registry();
            r.register_combo_pack(ComboPack::new("A", vec![PackRef::Combo("B".into())]))
                .unwrap();
            r.register_combo_pack(ComboPack::new("B", vec![PackRef::Combo("C".into())]))
                .unwrap();
            r.register_combo_pack(ComboPack::new("C", vec![PackRef::Combo("A".into())]))
                .unwrap();
            r
        };
        let mut resolver = ComboResolver::new(&reg);
        match resolver.resolve("A") {
            Err(RtvsError::CyclicReference { path }) => {
                assert_eq!(path, vec!["A", "B", "C", "A"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_pack() {
        let reg = registry();
        let mut resolver = ComboResolver::new(&reg);
        assert!(matches!(
            resolver.resolve("NoSuchCombo"),
            Err(RtvsError::UnknownPack(_))
        ));
    }

    #[test]
    fn test_resolution_cached_per_resolver() {
        let reg = {
            let mut r = registry();
            r.register_combo_pack(ComboPack::new(
                "Inner",
                vec![PackRef::Feature("Sidebar".into())],
            ))
            .unwrap();
            r.register_combo_pack(ComboPack::new(
                "Outer",
                vec![PackRef::Combo("Inner".into()), PackRef::Combo("Inner".into())],
            ))
            .unwrap();
            r
        };
        let mut resolver = ComboResolver::new(&reg);
        resolver.resolve("Outer").unwrap();
        assert_eq!(resolver.cache.len(), 2);

        // second call hits the cache and stays stable
        let again = resolver.resolve("Outer").unwrap();
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_selection_with_filters() {
        let mut reg = registry();
        reg.register(
            TestCase::new("T6")
                .with_tag("analytics")
                .with_criticality(Criticality::Critical),
        )
        .unwrap();
        reg.register_feature_pack(FeaturePack::new("Mixed", vec!["T1".into(), "T6".into()]))
            .unwrap();

        let mut resolver = ComboResolver::new(&reg);
        let filters = RunFilters {
            tags: vec!["analytics".into()],
            min_criticality: None,
        };
        let ids = resolver
            .resolve_selection(&Selection::FeaturePack("Mixed".into()), &filters)
            .unwrap();
        assert_eq!(ids, vec![TestCaseId::new("T6")]);
    }

    #[test]
    fn test_explicit_cases_unknown_id() {
        let reg = registry();
        let mut resolver = ComboResolver::new(&reg);
        let selection = Selection::Cases(vec!["T1".into(), "T404".into()]);
        assert!(matches!(
            resolver.resolve_selection(&selection, &RunFilters::default()),
            Err(RtvsError::UnknownTestCase(_))
        ));
    }
}
