//! On-disk cache layout
//!
//! ```text
//! <root>/<target>/<profile_tag>/<module>_<TIER>.mod   tiered artifact
//! <root>/<target>/<profile_tag>/<module>.mod          active artifact
//! <root>/<target>/<profile_tag>/manifest.json
//! ```
//!
//! The active artifact is overwritten on every write, whatever tier it held
//! before. A single writer per cache tree is assumed.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{Pattern, glob};
use tracing::{debug, info};

use otterpgo_config::{CacheConfig, Tier};

use crate::error::CacheError;
use crate::metadata::{CacheManifest, CacheMetadata};

pub const ARTIFACT_EXTENSION: &str = "mod";
pub const MANIFEST_FILE: &str = "manifest.json";

/// A `.mod` file found in a tag directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: PathBuf,
    /// Base module name with any tier suffix removed
    pub module: String,
    /// `None` for the active artifact
    pub tier: Option<Tier>,
}

/// Result of writing one module into the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub tiered_path: PathBuf,
    pub active_path: PathBuf,
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRepository {
    target_dir: PathBuf,
}

impl CacheRepository {
    pub fn new(root: impl AsRef<Path>, target: &str) -> Self {
        Self::at(root.as_ref().join(target))
    }

    /// Repository rooted directly at a target directory
    pub fn at(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::at(config.target_dir())
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn tag_dir(&self, profile_tag: &str) -> PathBuf {
        self.target_dir.join(profile_tag)
    }

    pub fn tiered_path(&self, profile_tag: &str, module: &str, tier: Tier) -> PathBuf {
        self.tag_dir(profile_tag)
            .join(format!("{module}{}.{ARTIFACT_EXTENSION}", tier.suffix()))
    }

    pub fn active_path(&self, profile_tag: &str, module: &str) -> PathBuf {
        self.tag_dir(profile_tag)
            .join(format!("{module}.{ARTIFACT_EXTENSION}"))
    }

    pub fn manifest_path(&self, profile_tag: &str) -> PathBuf {
        self.tag_dir(profile_tag).join(MANIFEST_FILE)
    }

    pub fn load_manifest(&self, profile_tag: &str) -> Result<CacheManifest, CacheError> {
        CacheManifest::load(&self.manifest_path(profile_tag))
    }

    /// Store `data` as the tiered artifact, then overwrite the active
    /// artifact and record it in the manifest
    pub fn write_artifact(
        &self,
        profile_tag: &str,
        module: &str,
        tier: Tier,
        data: &[u8],
    ) -> Result<StoredArtifact, CacheError> {
        validate_module_name(module)?;
        let tag_dir = self.tag_dir(profile_tag);
        fs::create_dir_all(&tag_dir).map_err(|err| CacheError::io(&tag_dir, err))?;

        let tiered_path = self.tiered_path(profile_tag, module, tier);
        fs::write(&tiered_path, data).map_err(|err| CacheError::io(&tiered_path, err))?;
        let active_path = self.active_path(profile_tag, module);
        fs::write(&active_path, data).map_err(|err| CacheError::io(&active_path, err))?;

        let metadata = CacheMetadata::new(module, tier, data);
        let manifest_path = self.manifest_path(profile_tag);
        let mut manifest = CacheManifest::load(&manifest_path)?;
        manifest.record(metadata.clone());
        manifest.save(&manifest_path)?;

        info!(
            module,
            tier = %tier,
            bytes = data.len(),
            path = %active_path.display(),
            "cached module"
        );
        Ok(StoredArtifact {
            tiered_path,
            active_path,
            metadata,
        })
    }

    /// Every `.mod` file in a tag directory, sorted by path. A missing
    /// directory yields an empty list.
    pub fn list_artifacts(&self, profile_tag: &str) -> Result<Vec<ArtifactFile>, CacheError> {
        let tag_dir = self.tag_dir(profile_tag);
        let pattern = format!(
            "{}/*.{ARTIFACT_EXTENSION}",
            Pattern::escape(&tag_dir.to_string_lossy())
        );

        let mut artifacts = Vec::new();
        for entry in glob(&pattern)? {
            let path = entry.map_err(|err| {
                let path = err.path().to_path_buf();
                CacheError::io(path, err.into_error())
            })?;
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                debug!(path = %path.display(), "skipping artifact with non UTF-8 name");
                continue;
            };
            let (module, tier) = parse_artifact_name(stem);
            artifacts.push(ArtifactFile {
                module: module.to_string(),
                tier,
                path,
            });
        }
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }
}

/// Split a file stem into base name and tier, stripping at most one suffix.
/// `compute_O2` is `("compute", Some(O2))`; `x_O1_O2` is `("x_O1", Some(O2))`.
pub fn parse_artifact_name(stem: &str) -> (&str, Option<Tier>) {
    for tier in Tier::ALL {
        if let Some(base) = stem.strip_suffix(tier.suffix()) {
            if !base.is_empty() {
                return (base, Some(tier));
            }
        }
    }
    (stem, None)
}

fn validate_module_name(module: &str) -> Result<(), CacheError> {
    let invalid = module.is_empty()
        || module == "."
        || module == ".."
        || module.contains(['/', '\\', '\0']);
    if invalid {
        return Err(CacheError::InvalidModuleName(module.to_string()));
    }
    Ok(())
}
