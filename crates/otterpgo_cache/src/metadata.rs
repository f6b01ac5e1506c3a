use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use otterpgo_config::Tier;

use crate::error::CacheError;

/// What apply last wrote for one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub module: String,
    pub tier: Tier,
    pub sha1: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub written_at: u64,
}

impl CacheMetadata {
    pub fn new(module: &str, tier: Tier, data: &[u8]) -> Self {
        Self {
            module: module.to_string(),
            tier,
            sha1: fingerprint(data),
            size: data.len() as u64,
            written_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |elapsed| elapsed.as_secs()),
        }
    }
}

/// Per-tag `manifest.json`. Informational: the registry is derived from the
/// artifacts themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default)]
    pub modules: BTreeMap<String, CacheMetadata>,
}

impl CacheManifest {
    /// Load a manifest, treating a missing file as empty
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(CacheError::io(path, err)),
        };
        serde_json::from_str(&text).map_err(|source| CacheError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CacheError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| CacheError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|err| CacheError::io(path, err))
    }

    pub fn record(&mut self, metadata: CacheMetadata) {
        self.modules.insert(metadata.module.clone(), metadata);
    }

    pub fn get(&self, module: &str) -> Option<&CacheMetadata> {
        self.modules.get(module)
    }
}

/// Hex SHA-1 of an artifact
pub fn fingerprint(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
