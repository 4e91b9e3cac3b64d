//! Pack catalog file
//!
//! Declarative catalog of test cases, feature packs and combo packs,
//! loaded from YAML or JSON and compiled into a validated registry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RtvsError;
use crate::models::{ComboPack, Criticality, FeaturePack, PackRef, TestCase};
use crate::registry::PackRegistry;

/// On-disk pack catalog
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    /// Version of the catalog format
    #[serde(default = "default_version")]
    pub version: String,

    /// Registered test cases
    #[serde(default)]
    pub cases: Vec<TestCase>,

    /// Feature pack definitions
    #[serde(default)]
    pub feature_packs: Vec<FeaturePackDef>,

    /// Combo pack definitions
    #[serde(default)]
    pub combo_packs: Vec<ComboPackDef>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Feature pack as declared in the catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeaturePackDef {
    pub name: String,

    /// Member case ids, order significant
    pub cases: Vec<String>,

    /// Optional criticality floor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality_floor: Option<Criticality>,
}

/// Combo pack as declared in the catalog. References are resolved in
/// declaration order: feature packs, then combo packs, then raw cases.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ComboPackDef {
    pub name: String,

    #[serde(default)]
    pub feature_packs: Vec<String>,

    #[serde(default)]
    pub combo_packs: Vec<String>,

    #[serde(default)]
    pub cases: Vec<String>,
}

impl CatalogFile {
    /// Load a catalog from a YAML or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read catalog file")?;
        Self::parse(&content, is_yaml(path.as_ref()))
    }

    /// Parse catalog content
    pub fn parse(content: &str, yaml: bool) -> Result<Self> {
        let catalog: Self = if yaml {
            serde_yaml::from_str(content).context("Failed to parse YAML catalog")?
        } else {
            serde_json::from_str(content).context("Failed to parse JSON catalog")?
        };
        Ok(catalog)
    }

    /// Compile the catalog into a validated, frozen registry
    pub fn build_registry(&self) -> Result<PackRegistry, RtvsError> {
        let mut registry = PackRegistry::new();

        for case in &self.cases {
            registry.register(case.clone())?;
        }

        for def in &self.feature_packs {
            let mut pack = FeaturePack::new(
                def.name.clone(),
                def.cases.iter().map(|id| id.as_str().into()).collect(),
            );
            if let Some(floor) = def.criticality_floor {
                pack = pack.with_floor(floor);
            }
            registry.register_feature_pack(pack)?;
        }

        for def in &self.combo_packs {
            let mut refs: Vec<PackRef> = Vec::new();
            refs.extend(def.feature_packs.iter().cloned().map(PackRef::Feature));
            refs.extend(def.combo_packs.iter().cloned().map(PackRef::Combo));
            refs.extend(def.cases.iter().map(|id| PackRef::Case(id.as_str().into())));
            registry.register_combo_pack(ComboPack::new(def.name.clone(), refs))?;
        }

        registry.validate()?;
        Ok(registry)
    }

    /// Save the catalog to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if is_yaml(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize catalog")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize catalog")?
        };
        std::fs::write(path, content).context("Failed to write catalog file")?;
        Ok(())
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
