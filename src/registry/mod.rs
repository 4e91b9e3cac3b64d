//! Pack registry
//!
//! Holds the declared catalog of test cases, feature packs and combo
//! packs. The catalog is mutable only until `validate()`; validation
//! checks structure, then freezes the registry for the process lifetime.
//! A reload requires a fresh registry, never in-place mutation.

mod resolver;

pub use resolver::ComboResolver;

use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::error::RtvsError;
use crate::models::{ComboPack, FeaturePack, PackMembership, PackRef, TestCase, TestCaseId};

/// Registry of test cases and packs
#[derive(Debug, Default)]
pub struct PackRegistry {
    cases: BTreeMap<TestCaseId, TestCase>,
    feature_packs: BTreeMap<String, FeaturePack>,
    combo_packs: BTreeMap<String, ComboPack>,

    /// Name collisions observed during registration, reported by validate()
    duplicates: Vec<(&'static str, String)>,

    frozen: bool,
}

impl PackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a test case. Idempotent before validate(): re-registering
    /// the identical definition is a no-op, a differing one is a name
    /// collision reported by validate().
    pub fn register(&mut self, case: TestCase) -> Result<(), RtvsError> {
        self.ensure_mutable()?;
        if let Some(existing) = self.cases.get(&case.id) {
            if *existing != case {
                self.duplicates.push(("test case", case.id.to_string()));
            }
            return Ok(());
        }
        self.cases.insert(case.id.clone(), case);
        Ok(())
    }

    /// Register a feature pack
    pub fn register_feature_pack(&mut self, pack: FeaturePack) -> Result<(), RtvsError> {
        self.ensure_mutable()?;
        if let Some(existing) = self.feature_packs.get(&pack.name) {
            if *existing != pack {
                self.duplicates.push(("feature pack", pack.name.clone()));
            }
            return Ok(());
        }
        self.feature_packs.insert(pack.name.clone(), pack);
        Ok(())
    }

    /// Register a combo pack
    pub fn register_combo_pack(&mut self, pack: ComboPack) -> Result<(), RtvsError> {
        self.ensure_mutable()?;
        if let Some(existing) = self.combo_packs.get(&pack.name) {
            if *existing != pack {
                self.duplicates.push(("combo pack", pack.name.clone()));
            }
            return Ok(());
        }
        self.combo_packs.insert(pack.name.clone(), pack);
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), RtvsError> {
        if self.frozen {
            Err(RtvsError::RegistryFrozen)
        } else {
            Ok(())
        }
    }

    /// Validate structure and freeze the registry.
    ///
    /// Fails on name collisions, dangling references and cyclic combo
    /// references. On success the registry is read-only for the rest of
    /// the process lifetime.
    pub fn validate(&mut self) -> Result<(), RtvsError> {
        if let Some((namespace, name)) = self.duplicates.first() {
            return Err(RtvsError::DuplicateName {
                namespace,
                name: name.clone(),
            });
        }

        for pack in self.feature_packs.values() {
            for id in &pack.cases {
                if !self.cases.contains_key(id) {
                    return Err(RtvsError::UnknownReference {
                        pack: pack.name.clone(),
                        reference: id.to_string(),
                    });
                }
            }
        }

        for pack in self.combo_packs.values() {
            for r in &pack.refs {
                let ok = match r {
                    PackRef::Feature(name) => self.feature_packs.contains_key(name),
                    PackRef::Combo(name) => self.combo_packs.contains_key(name),
                    PackRef::Case(id) => self.cases.contains_key(id),
                };
                if !ok {
                    return Err(RtvsError::UnknownReference {
                        pack: pack.name.clone(),
                        reference: r.to_string(),
                    });
                }
            }
        }

        // Cycles are rejected here, before any run can be triggered.
        let mut resolver = ComboResolver::new(self);
        for name in self.combo_packs.keys() {
            resolver.resolve(name)?;
        }

        // Automated cases outside every feature pack are reachable only
        // via explicit selection; worth a warning, not an error.
        let assigned: HashSet<&TestCaseId> = self
            .feature_packs
            .values()
            .flat_map(|p| p.cases.iter())
            .collect();
        for case in self.cases.values() {
            if case.automation.is_automated() && !assigned.contains(&case.id) {
                warn!("test case {} belongs to no feature pack", case.id);
            }
        }

        self.frozen = true;
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn case(&self, id: &TestCaseId) -> Option<&TestCase> {
        self.cases.get(id)
    }

    pub fn feature_pack(&self, name: &str) -> Option<&FeaturePack> {
        self.feature_packs.get(name)
    }

    pub fn combo_pack(&self, name: &str) -> Option<&ComboPack> {
        self.combo_packs.get(name)
    }

    pub fn cases(&self) -> impl Iterator<Item = &TestCase> {
        self.cases.values()
    }

    pub fn feature_packs(&self) -> impl Iterator<Item = &FeaturePack> {
        self.feature_packs.values()
    }

    pub fn combo_packs(&self) -> impl Iterator<Item = &ComboPack> {
        self.combo_packs.values()
    }

    pub fn case_count(&self) -> usize {
        self.cases.len()
    }

    /// Membership graph snapshot taken at run start, used by reports.
    /// Requires a frozen (validated, therefore acyclic) registry.
    pub fn membership_snapshot(&self) -> PackMembership {
        let mut membership = PackMembership::default();

        for pack in self.feature_packs.values() {
            for id in &pack.cases {
                membership
                    .features_of
                    .entry(id.clone())
                    .or_default()
                    .push(pack.name.clone());
            }
        }

        let mut resolver = ComboResolver::new(self);
        for name in self.combo_packs.keys() {
            if let Ok(ids) = resolver.resolve(name) {
                for id in ids {
                    membership
                        .combos_of
                        .entry(id.clone())
                        .or_default()
                        .push(name.clone());
                }
            }
        }

        membership
    }
}
