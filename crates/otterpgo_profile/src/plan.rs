//! Recompilation plans
//!
//! A plan ranks every profiled module by total cycles (descending, ties keep
//! report order) and records the tier each one should be rebuilt at. Plans
//! are pure functions of the profile and the thresholds, so persisting the
//! same inputs twice yields byte-identical files.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use otterpgo_config::{ThresholdConfig, Tier};

use crate::classifier::{Classifier, HeatReason};
use crate::error::ProfileError;
use crate::model::{Profile, check_module_name};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub name: String,
    pub calls: u64,
    pub total_cycles: u64,
    pub tier: Tier,
    pub reason: HeatReason,
}

/// Where the profile behind a plan came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanProvenance {
    /// Path or label of the profile report
    pub profile_source: String,
    pub generated_from: Option<String>,
    pub generated_at: Option<String>,
    pub profile_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub provenance: PlanProvenance,
    pub thresholds: ThresholdConfig,
    pub entries: Vec<PlanEntry>,
}

/// On-disk form of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub profile_source: String,
    pub generated_from: Option<String>,
    pub generated_at: Option<String>,
    pub profile_tag: Option<String>,
    pub call_threshold: u64,
    pub cycle_threshold: u64,
    pub modules: Vec<PlanArtifactEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanArtifactEntry {
    pub name: String,
    pub calls: u64,
    pub total_cycles: u64,
    pub suggested_opt: Tier,
    pub reason: String,
}

impl PlanArtifact {
    /// Read a plan previously written by [`Plan::save`]
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = fs::read_to_string(path).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let origin = path.display().to_string();
        let artifact: Self = serde_json::from_str(&text).map_err(|source| ProfileError::Json {
            origin: origin.clone(),
            source,
        })?;
        for entry in &artifact.modules {
            check_module_name(&entry.name)
                .map_err(|message| ProfileError::validation(&origin, message))?;
        }
        Ok(artifact)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    classifier: Classifier,
}

impl PlanBuilder {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self {
            classifier: Classifier::new(thresholds),
        }
    }

    pub fn build(&self, profile: &Profile, profile_source: &str) -> Plan {
        let mut ranked: Vec<_> = profile.modules.iter().collect();
        // `sort_by` is stable, so equal cycle counts keep report order
        ranked.sort_by(|a, b| b.total_cycles.cmp(&a.total_cycles));

        let entries = ranked
            .into_iter()
            .map(|module| {
                let classification = self.classifier.classify_module(module);
                PlanEntry {
                    name: module.name.clone(),
                    calls: module.calls,
                    total_cycles: module.total_cycles,
                    tier: classification.tier,
                    reason: classification.reason,
                }
            })
            .collect();

        Plan {
            provenance: PlanProvenance {
                profile_source: profile_source.to_string(),
                generated_from: profile.hostname.clone(),
                generated_at: profile.generated_at.clone(),
                profile_tag: profile.profile_tag.clone(),
            },
            thresholds: self.classifier.thresholds().clone(),
            entries,
        }
    }
}

impl Plan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, name: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Number of modules assigned to each tier
    pub fn tier_counts(&self) -> BTreeMap<Tier, usize> {
        let mut counts: BTreeMap<Tier, usize> = Tier::ALL.iter().map(|&tier| (tier, 0)).collect();
        for entry in &self.entries {
            *counts.entry(entry.tier).or_insert(0) += 1;
        }
        counts
    }

    pub fn to_artifact(&self) -> PlanArtifact {
        PlanArtifact {
            profile_source: self.provenance.profile_source.clone(),
            generated_from: self.provenance.generated_from.clone(),
            generated_at: self.provenance.generated_at.clone(),
            profile_tag: self.provenance.profile_tag.clone(),
            call_threshold: self.thresholds.call_threshold,
            cycle_threshold: self.thresholds.cycle_threshold,
            modules: self
                .entries
                .iter()
                .map(|entry| PlanArtifactEntry {
                    name: entry.name.clone(),
                    calls: entry.calls,
                    total_cycles: entry.total_cycles,
                    suggested_opt: entry.tier,
                    reason: entry.reason.description().to_string(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_artifact())
    }

    /// Persist the plan as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), ProfileError> {
        let json = self.to_json().map_err(|source| ProfileError::Json {
            origin: path.display().to_string(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ProfileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| ProfileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), modules = self.len(), "wrote recompile plan");
        Ok(())
    }

    /// Fixed-width table for terminal output
    pub fn render_table(&self) -> String {
        let mut out = format!(
            "{:<16} {:>10} {:>15} {:>10}  Reason\n{}\n",
            "Module",
            "Calls",
            "Cycles",
            "Suggested",
            "-".repeat(64)
        );
        for entry in &self.entries {
            out.push_str(&format!(
                "{:<16} {:>10} {:>15} {:>10}  {}\n",
                entry.name,
                entry.calls,
                entry.total_cycles,
                entry.tier.name(),
                entry.reason
            ));
        }
        out
    }
}
