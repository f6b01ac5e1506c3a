//! In-memory registry of the modules present in one cache tag directory

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use otterpgo_config::Tier;

use crate::error::CacheError;
use crate::repository::{ArtifactFile, CacheRepository};

/// Callback invoked once per registered module with
/// `(name, data, size, context)`
pub trait ModuleVisitor<C: ?Sized> {
    fn visit(&mut self, name: &str, data: &[u8], size: usize, ctx: &mut C);
}

impl<C, F> ModuleVisitor<C> for F
where
    C: ?Sized,
    F: FnMut(&str, &[u8], usize, &mut C),
{
    fn visit(&mut self, name: &str, data: &[u8], size: usize, ctx: &mut C) {
        self(name, data, size, ctx);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModule {
    pub name: String,
    pub path: PathBuf,
    /// Tier of the artifact the data was read from; `None` for the active one
    pub tier: Option<Tier>,
    pub data: Vec<u8>,
}

impl RegisteredModule {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registry {
    modules: BTreeMap<String, RegisteredModule>,
}

#[derive(Default)]
struct Candidates {
    active: Option<PathBuf>,
    best_tiered: Option<(Tier, PathBuf)>,
}

impl Registry {
    /// Snapshot the modules present under `profile_tag`.
    ///
    /// Each base name is backed by its active artifact, or by its
    /// highest-tier artifact when no active one exists. Nothing is checked
    /// for staleness.
    pub fn generate(repository: &CacheRepository, profile_tag: &str) -> Result<Self, CacheError> {
        let mut candidates: BTreeMap<String, Candidates> = BTreeMap::new();
        for ArtifactFile { path, module, tier } in repository.list_artifacts(profile_tag)? {
            let slot = candidates.entry(module).or_default();
            match tier {
                None => slot.active = Some(path),
                Some(tier) => {
                    if slot.best_tiered.as_ref().is_none_or(|(best, _)| tier > *best) {
                        slot.best_tiered = Some((tier, path));
                    }
                }
            }
        }

        let mut modules = BTreeMap::new();
        for (name, slot) in candidates {
            let (path, tier) = match (slot.active, slot.best_tiered) {
                (Some(path), _) => (path, None),
                (None, Some((tier, path))) => {
                    debug!(module = %name, tier = %tier, "no active artifact, using tiered");
                    (path, Some(tier))
                }
                (None, None) => continue,
            };
            let data = fs::read(&path).map_err(|err| CacheError::io(&path, err))?;
            modules.insert(
                name.clone(),
                RegisteredModule {
                    name,
                    path,
                    tier,
                    data,
                },
            );
        }

        info!(
            tag = profile_tag,
            modules = modules.len(),
            dir = %repository.tag_dir(profile_tag).display(),
            "generated module registry"
        );
        Ok(Self { modules })
    }

    /// Visit every module once, in name order
    pub fn for_each<C, V>(&self, visitor: &mut V, ctx: &mut C)
    where
        C: ?Sized,
        V: ModuleVisitor<C> + ?Sized,
    {
        for module in self.modules.values() {
            visitor.visit(&module.name, &module.data, module.size(), ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredModule> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = &RegisteredModule> {
        self.modules.values()
    }
}
