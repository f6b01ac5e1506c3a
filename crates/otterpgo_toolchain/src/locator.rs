use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use otterpgo_config::ToolchainConfig;

/// A plan entry whose source file could not be found. Not fatal: the module
/// is skipped and the rest of the plan proceeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingSource {
    pub name: String,
    pub tried: Vec<PathBuf>,
}

impl fmt::Display for MissingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no source for module `{}` (tried ", self.name)?;
        for (index, path) in self.tried.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", path.display())?;
        }
        f.write_str(")")
    }
}

/// Maps module names to source files: `<module_dir>/<name>.<ext>` first,
/// then an explicit alias table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    module_dir: PathBuf,
    extension: String,
    aliases: BTreeMap<String, PathBuf>,
}

impl SourceLocator {
    pub fn new(module_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            module_dir: module_dir.into(),
            extension: extension.into(),
            aliases: BTreeMap::new(),
        }
    }

    /// Locator for a toolchain config whose module directory is relative to
    /// `root`
    pub fn from_config(config: &ToolchainConfig, root: &Path) -> Self {
        Self {
            module_dir: root.join(&config.module_dir),
            extension: config.source_extension.clone(),
            aliases: config.aliases.clone(),
        }
    }

    /// Relative alias paths are resolved against the module directory
    pub fn with_alias(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.aliases.insert(name.into(), path.into());
        self
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    pub fn canonical_path(&self, name: &str) -> PathBuf {
        self.module_dir.join(format!("{name}.{}", self.extension))
    }

    pub fn locate(&self, name: &str) -> Result<PathBuf, MissingSource> {
        let mut tried = vec![self.canonical_path(name)];
        if let Some(alias) = self.aliases.get(name) {
            tried.push(self.module_dir.join(alias));
        }

        match tried.iter().find(|path| path.is_file()) {
            Some(path) => Ok(path.clone()),
            None => Err(MissingSource {
                name: name.to_string(),
                tried,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn test_canonical_then_alias() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("sum.c"), "int sum;").unwrap();
        fs::create_dir_all(dir.path().join("math")).unwrap();
        fs::write(dir.path().join("math/fft.c"), "int fft;").unwrap();

        let locator = SourceLocator::new(dir.path(), "c")
            .with_alias("fft_1d", "math/fft.c")
            .with_alias("sum", "elsewhere.c");

        assert_eq!(locator.locate("sum").unwrap(), dir.path().join("sum.c"));
        assert_eq!(locator.locate("fft_1d").unwrap(), dir.path().join("math/fft.c"));
    }

    #[test]
    fn test_absolute_alias() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("abs.c");
        fs::write(&source, "").unwrap();
        let locator = SourceLocator::new("modules", "c").with_alias("primes", &source);
        assert_eq!(locator.locate("primes").unwrap(), source);
    }

    #[test]
    fn test_missing_source_lists_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let locator = SourceLocator::new(dir.path(), "c").with_alias("ghost", "gone.c");
        let missing = locator.locate("ghost").unwrap_err();
        assert_eq!(missing.name, "ghost");
        assert_eq!(
            missing.tried,
            [dir.path().join("ghost.c"), dir.path().join("gone.c")]
        );
        assert!(missing.to_string().starts_with("no source for module `ghost`"));
    }

    #[test]
    fn test_from_config() {
        let config = ToolchainConfig::default();
        let locator = SourceLocator::from_config(&config, Path::new("/project"));
        assert_eq!(
            locator.canonical_path("sum"),
            Path::new("/project/modules/sum.c")
        );
    }
}
