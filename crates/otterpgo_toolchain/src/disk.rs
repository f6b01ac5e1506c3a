//! Copying active cache artifacts onto the target's FAT disk image
//!
//! Files land in the image root as 8.3 names: the module name uppercased
//! with every non-alphanumeric replaced by `_`, cut to eight characters,
//! with a `.MOD` extension. Two modules mapping to the same disk name are
//! rejected before anything is copied.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use otterpgo_cache::CacheRepository;
use otterpgo_config::DiskConfig;

use crate::error::ToolError;
use crate::runner::{Invocation, ProcessRunner, run_checked};

const DISK_STEM_LEN: usize = 8;

/// 8.3 name a module is stored under on the disk image
pub fn disk_name(module: &str) -> String {
    let stem: String = module
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .take(DISK_STEM_LEN)
        .collect();
    format!("{stem}.MOD")
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("modules `{first}` and `{second}` both map to disk name {disk_name}")]
    NameCollision {
        disk_name: String,
        first: String,
        second: String,
    },

    #[error("disk image {0} does not exist")]
    MissingImage(PathBuf),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    #[default]
    Execute,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskCopy {
    pub module: String,
    pub source: PathBuf,
    pub disk_name: String,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    pub planned: Vec<DiskCopy>,
    /// Modules with no active artifact in the cache
    pub not_cached: Vec<String>,
    pub synced: Vec<String>,
    pub failed: Vec<(String, ToolError)>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskTransport {
    program: String,
    image: PathBuf,
    timeout: Duration,
}

impl DiskTransport {
    pub fn new(program: impl Into<String>, image: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            image: image.into(),
            timeout,
        }
    }

    /// Transport for a disk config whose image path is relative to `root`
    pub fn from_config(config: &DiskConfig, root: &Path) -> Self {
        Self::new(config.program.as_str(), root.join(&config.image), config.timeout())
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Pair each module with its active artifact and disk name
    pub fn plan_copies<'m>(
        &self,
        modules: impl IntoIterator<Item = &'m str>,
        repository: &CacheRepository,
        profile_tag: &str,
    ) -> Result<SyncReport, DiskError> {
        let mut report = SyncReport::default();
        let mut claimed: BTreeMap<String, String> = BTreeMap::new();

        for module in modules {
            let source = repository.active_path(profile_tag, module);
            if !source.is_file() {
                warn!(module, path = %source.display(), "not compiled yet, skipping");
                report.not_cached.push(module.to_string());
                continue;
            }
            let name = disk_name(module);
            if let Some(first) = claimed.get(&name) {
                return Err(DiskError::NameCollision {
                    disk_name: name,
                    first: first.clone(),
                    second: module.to_string(),
                });
            }
            claimed.insert(name.clone(), module.to_string());
            report.planned.push(DiskCopy {
                module: module.to_string(),
                source,
                disk_name: name,
            });
        }
        Ok(report)
    }

    pub fn invocation(&self, copy: &DiskCopy) -> Invocation {
        Invocation::new(self.program.as_str(), self.timeout)
            .arg("-i")
            .arg(self.image.display().to_string())
            .arg("-o")
            .arg(copy.source.display().to_string())
            .arg(format!("::{}", copy.disk_name))
    }

    /// Copy every planned artifact. Each failure is recorded and the
    /// remaining copies are still attempted.
    pub fn sync<R: ProcessRunner + ?Sized>(
        &self,
        runner: &mut R,
        mut report: SyncReport,
        mode: SyncMode,
    ) -> Result<SyncReport, DiskError> {
        if mode == SyncMode::DryRun {
            for copy in &report.planned {
                info!(
                    "would copy {} -> {}::{}",
                    copy.source.display(),
                    self.image.display(),
                    copy.disk_name
                );
            }
            return Ok(report);
        }
        if !self.image.is_file() {
            return Err(DiskError::MissingImage(self.image.clone()));
        }

        for copy in &report.planned {
            match run_checked(&mut *runner, &self.invocation(copy)) {
                Ok(_) => {
                    info!(module = %copy.module, disk_name = %copy.disk_name, "synced");
                    report.synced.push(copy.module.clone());
                }
                Err(err) => {
                    warn!(module = %copy.module, "sync failed: {err}");
                    report.failed.push((copy.module.clone(), err));
                }
            }
        }
        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            image = %self.image.display(),
            "disk sync finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::runner::ToolOutput;
    use otterpgo_config::Tier;

    #[derive(Default)]
    struct FakeMcopy {
        calls: Vec<Invocation>,
        fail_for: Vec<String>,
    }

    impl ProcessRunner for FakeMcopy {
        fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
            self.calls.push(invocation.clone());
            let target = invocation.args.last().cloned().unwrap_or_default();
            let status = if self.fail_for.contains(&target) { 1 } else { 0 };
            Ok(ToolOutput {
                status: Some(status),
                stderr: if status == 0 { String::new() } else { "disk full".into() },
                ..ToolOutput::default()
            })
        }
    }

    fn cached(modules: &[&str]) -> (tempfile::TempDir, CacheRepository, DiskTransport) {
        let dir = tempfile::tempdir().unwrap();
        let repository = CacheRepository::at(dir.path().join("cache"));
        for module in modules {
            repository
                .write_artifact("default", module, Tier::O2, b"code")
                .unwrap();
        }
        let image = dir.path().join("fat16.img");
        fs::write(&image, b"").unwrap();
        let transport = DiskTransport::new("mcopy", image, Duration::from_secs(30));
        (dir, repository, transport)
    }

    #[test]
    fn test_disk_name() {
        assert_eq!(disk_name("sum"), "SUM.MOD");
        assert_eq!(disk_name("matrix_mul"), "MATRIX_M.MOD");
        assert_eq!(disk_name("fft-1d"), "FFT_1D.MOD");
    }

    #[test]
    fn test_sync_invokes_mcopy() {
        let (_dir, repository, transport) = cached(&["sum", "compute"]);
        let planned = transport
            .plan_copies(["compute", "sum", "primes"], &repository, "default")
            .unwrap();
        assert_eq!(planned.not_cached, ["primes"]);

        let mut runner = FakeMcopy::default();
        let report = transport.sync(&mut runner, planned, SyncMode::Execute).unwrap();
        assert!(report.is_success());
        assert_eq!(report.synced, ["compute", "sum"]);

        let args = &runner.calls[0].args;
        assert_eq!(args[0], "-i");
        assert!(args[1].ends_with("fat16.img"));
        assert_eq!(args[2], "-o");
        assert!(args[3].ends_with("compute.mod"));
        assert_eq!(args[4], "::COMPUTE.MOD");
    }

    #[test]
    fn test_collision_rejected_before_copying() {
        let (_dir, repository, transport) = cached(&["matrix_mul", "matrix_multiply"]);
        let err = transport
            .plan_copies(["matrix_mul", "matrix_multiply"], &repository, "default")
            .unwrap_err();
        match err {
            DiskError::NameCollision {
                disk_name,
                first,
                second,
            } => {
                assert_eq!(disk_name, "MATRIX_M.MOD");
                assert_eq!((first.as_str(), second.as_str()), ("matrix_mul", "matrix_multiply"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failures_are_counted_and_rest_continue() {
        let (_dir, repository, transport) = cached(&["a", "b", "c"]);
        let planned = transport
            .plan_copies(["a", "b", "c"], &repository, "default")
            .unwrap();
        let mut runner = FakeMcopy {
            fail_for: vec!["::B.MOD".to_string()],
            ..FakeMcopy::default()
        };
        let report = transport.sync(&mut runner, planned, SyncMode::Execute).unwrap();
        assert_eq!(runner.calls.len(), 3);
        assert_eq!(report.synced, ["a", "c"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "b");
        assert!(!report.is_success());
    }

    #[test]
    fn test_dry_run_copies_nothing() {
        let (_dir, repository, transport) = cached(&["sum"]);
        let planned = transport.plan_copies(["sum"], &repository, "default").unwrap();
        let mut runner = FakeMcopy::default();
        let report = transport.sync(&mut runner, planned, SyncMode::DryRun).unwrap();
        assert!(runner.calls.is_empty());
        assert_eq!(report.planned.len(), 1);
        assert!(report.synced.is_empty());
    }

    #[test]
    fn test_missing_image() {
        let (dir, repository, _) = cached(&["sum"]);
        let transport =
            DiskTransport::new("mcopy", dir.path().join("none.img"), Duration::from_secs(1));
        let planned = transport.plan_copies(["sum"], &repository, "default").unwrap();
        let err = transport
            .sync(&mut FakeMcopy::default(), planned, SyncMode::Execute)
            .unwrap_err();
        assert!(matches!(err, DiskError::MissingImage(_)));
    }
}
