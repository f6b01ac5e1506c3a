//! Applying a plan: recompile every module at its assigned tier, extract a
//! raw binary and store it in the cache
//!
//! Modules are processed one at a time in plan order. A missing source is
//! logged and skipped; any compiler or extractor failure aborts the whole
//! apply, leaving the artifacts already written in place.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use otterpgo_cache::{CacheRepository, StoredArtifact};
use otterpgo_config::{Tier, ToolchainConfig};
use otterpgo_profile::{Plan, PlanEntry};

use crate::error::ApplyError;
use crate::locator::{MissingSource, SourceLocator};
use crate::runner::{Invocation, ProcessRunner, run_checked};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyMode {
    #[default]
    Execute,
    /// Resolve sources and report the commands, touching nothing
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedModule {
    pub name: String,
    pub tier: Tier,
    pub source: PathBuf,
    /// `None` in dry-run mode
    pub stored: Option<StoredArtifact>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<AppliedModule>,
    pub missing: Vec<MissingSource>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }
}

pub struct RecompileOrchestrator<'a, R: ProcessRunner + ?Sized> {
    runner: &'a mut R,
    toolchain: &'a ToolchainConfig,
    repository: &'a CacheRepository,
    mode: ApplyMode,
}

impl<'a, R: ProcessRunner + ?Sized> RecompileOrchestrator<'a, R> {
    pub fn new(
        runner: &'a mut R,
        toolchain: &'a ToolchainConfig,
        repository: &'a CacheRepository,
    ) -> Self {
        Self {
            runner,
            toolchain,
            repository,
            mode: ApplyMode::Execute,
        }
    }

    pub fn with_mode(mut self, mode: ApplyMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn apply(
        &mut self,
        plan: &Plan,
        locator: &SourceLocator,
        profile_tag: &str,
    ) -> Result<ApplyReport, ApplyError> {
        let workdir = tempfile::Builder::new()
            .prefix("otterpgo-apply-")
            .tempdir()
            .map_err(|source| ApplyError::Io {
                path: std::env::temp_dir(),
                source,
            })?;

        let mut report = ApplyReport::default();
        for entry in &plan.entries {
            let source = match locator.locate(&entry.name) {
                Ok(source) => source,
                Err(missing) => {
                    warn!(module = %entry.name, "{missing}, skipping");
                    report.missing.push(missing);
                    continue;
                }
            };
            let applied = self.apply_entry(entry, source, workdir.path(), profile_tag)?;
            report.applied.push(applied);
        }

        info!(
            tag = profile_tag,
            applied = report.applied.len(),
            missing = report.missing.len(),
            dry_run = self.mode == ApplyMode::DryRun,
            "applied recompile plan"
        );
        Ok(report)
    }

    fn apply_entry(
        &mut self,
        entry: &PlanEntry,
        source: PathBuf,
        workdir: &Path,
        profile_tag: &str,
    ) -> Result<AppliedModule, ApplyError> {
        let object = workdir.join(format!("{}.o", entry.name));
        let blob = workdir.join(format!("{}.bin", entry.name));
        let compile = self.compile_invocation(entry.tier, &source, &object);
        let extract = self.extract_invocation(&object, &blob);
        let commands = vec![compile.command_line(), extract.command_line()];

        if self.mode == ApplyMode::DryRun {
            for command in &commands {
                info!(module = %entry.name, "would run: {command}");
            }
            return Ok(AppliedModule {
                name: entry.name.clone(),
                tier: entry.tier,
                source,
                stored: None,
                commands,
            });
        }

        let tool_error = |source| ApplyError::Tool {
            module: entry.name.clone(),
            source,
        };
        run_checked(&mut *self.runner, &compile).map_err(tool_error)?;
        run_checked(&mut *self.runner, &extract).map_err(tool_error)?;

        if let Err(err) = fs::remove_file(&object) {
            warn!(path = %object.display(), "could not remove object file: {err}");
        }
        let data = fs::read(&blob).map_err(|source| ApplyError::Io {
            path: blob.clone(),
            source,
        })?;
        let stored = self
            .repository
            .write_artifact(profile_tag, &entry.name, entry.tier, &data)
            .map_err(|source| ApplyError::Cache {
                module: entry.name.clone(),
                source,
            })?;

        Ok(AppliedModule {
            name: entry.name.clone(),
            tier: entry.tier,
            source,
            stored: Some(stored),
            commands,
        })
    }

    fn compile_invocation(&self, tier: Tier, source: &Path, object: &Path) -> Invocation {
        Invocation::new(self.toolchain.compiler.as_str(), self.toolchain.compile_timeout())
            .args(self.toolchain.baseline_flags.iter().cloned())
            .arg(tier.compiler_flag())
            .arg("-c")
            .arg(source.display().to_string())
            .arg("-o")
            .arg(object.display().to_string())
    }

    fn extract_invocation(&self, object: &Path, blob: &Path) -> Invocation {
        Invocation::new(self.toolchain.extractor.as_str(), self.toolchain.extract_timeout())
            .args(self.toolchain.extractor_args.iter().cloned())
            .arg(object.display().to_string())
            .arg(blob.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::runner::ToolOutput;
    use otterpgo_config::ThresholdConfig;
    use otterpgo_profile::{ModuleProfile, PlanBuilder, Profile};

    /// Pretends to be gcc and objcopy: the compiler writes the tier flag and
    /// source path into the object, the extractor copies object to blob
    #[derive(Default)]
    struct FakeToolchain {
        calls: Vec<Invocation>,
        fail_compile_of: Option<String>,
    }

    impl ProcessRunner for FakeToolchain {
        fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
            self.calls.push(invocation.clone());
            let args = &invocation.args;
            match invocation.program.as_str() {
                "gcc" => {
                    let source = &args[args.iter().position(|a| a == "-c").unwrap() + 1];
                    if self
                        .fail_compile_of
                        .as_deref()
                        .is_some_and(|name| source.ends_with(&format!("{name}.c")))
                    {
                        return Ok(ToolOutput {
                            status: Some(1),
                            stderr: format!("{source}: syntax error"),
                            ..ToolOutput::default()
                        });
                    }
                    let flag = args.iter().find(|a| a.starts_with("-O")).unwrap();
                    let object = &args[args.iter().position(|a| a == "-o").unwrap() + 1];
                    fs::write(object, format!("{flag} {source}")).unwrap();
                }
                "objcopy" => {
                    let object = &args[args.len() - 2];
                    fs::copy(object, &args[args.len() - 1]).unwrap();
                }
                other => panic!("unexpected program {other}"),
            }
            Ok(ToolOutput {
                status: Some(0),
                ..ToolOutput::default()
            })
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        repository: CacheRepository,
        locator: SourceLocator,
        toolchain: ToolchainConfig,
    }

    fn fixture(sources: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("modules");
        fs::create_dir_all(&module_dir).unwrap();
        for name in sources {
            fs::write(module_dir.join(format!("{name}.c")), "int x;").unwrap();
        }
        Fixture {
            repository: CacheRepository::at(dir.path().join("cache/i686")),
            locator: SourceLocator::new(&module_dir, "c"),
            toolchain: ToolchainConfig::default(),
            dir,
        }
    }

    fn plan() -> Plan {
        let profile = Profile::new(vec![
            ModuleProfile::new("sum", 50, 1_000),
            ModuleProfile::new("compute", 1000, 2_000_000),
            ModuleProfile::new("ghost", 150, 50_000),
            ModuleProfile::new("primes", 0, 0),
        ]);
        PlanBuilder::new(ThresholdConfig::default()).build(&profile, "export.json")
    }

    #[test]
    fn test_apply_writes_tiered_and_active_artifacts() {
        let fx = fixture(&["sum", "compute", "primes"]);
        let mut runner = FakeToolchain::default();
        let report = RecompileOrchestrator::new(&mut runner, &fx.toolchain, &fx.repository)
            .apply(&plan(), &fx.locator, "bench")
            .unwrap();

        let order: Vec<_> = report.applied.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(order, ["compute", "sum", "primes"]);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].name, "ghost");

        let tiered = fx.repository.tiered_path("bench", "compute", Tier::O3);
        assert!(fs::read_to_string(&tiered).unwrap().starts_with("-O3 "));
        let active = fs::read_to_string(fx.repository.active_path("bench", "compute")).unwrap();
        assert!(active.starts_with("-O3 "));
        assert!(fx.repository.tiered_path("bench", "primes", Tier::O0).exists());
        assert!(fx.repository.tiered_path("bench", "sum", Tier::O1).exists());

        let manifest = fx.repository.load_manifest("bench").unwrap();
        assert_eq!(manifest.modules.len(), 3);
        assert!(fx.dir.path().join("cache/i686/bench/manifest.json").exists());
    }

    #[test]
    fn test_compile_command_shape() {
        let fx = fixture(&["compute"]);
        let mut runner = FakeToolchain::default();
        RecompileOrchestrator::new(&mut runner, &fx.toolchain, &fx.repository)
            .apply(&plan(), &fx.locator, "default")
            .unwrap();

        let compile = &runner.calls[0];
        assert_eq!(compile.program, "gcc");
        assert_eq!(
            &compile.args[..6],
            ["-m32", "-ffreestanding", "-nostdlib", "-fno-stack-protector", "-fno-pic", "-O3"]
        );
        assert_eq!(compile.args[6], "-c");
        assert!(compile.args[8] == "-o" && compile.args[9].ends_with("compute.o"));

        let extract = &runner.calls[1];
        assert_eq!(extract.program, "objcopy");
        assert_eq!(&extract.args[..2], ["-O", "binary"]);
        assert!(extract.args[3].ends_with("compute.bin"));
        // intermediate object is removed once extracted
        assert!(!Path::new(&extract.args[2]).exists());
    }

    #[test]
    fn test_tool_failure_aborts_apply() {
        let fx = fixture(&["sum", "compute", "primes"]);
        let mut runner = FakeToolchain {
            fail_compile_of: Some("sum".to_string()),
            ..FakeToolchain::default()
        };
        let err = RecompileOrchestrator::new(&mut runner, &fx.toolchain, &fx.repository)
            .apply(&plan(), &fx.locator, "default")
            .unwrap_err();

        match err {
            ApplyError::Tool { module, source } => {
                assert_eq!(module, "sum");
                assert!(matches!(source, ToolError::Failed { status: Some(1), .. }));
                assert!(source.to_string().contains("syntax error"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // compute ran before sum failed, primes never ran
        assert!(fx.repository.active_path("default", "compute").exists());
        assert!(!fx.repository.active_path("default", "primes").exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fx = fixture(&["sum", "compute"]);
        let mut runner = FakeToolchain::default();
        let report = RecompileOrchestrator::new(&mut runner, &fx.toolchain, &fx.repository)
            .with_mode(ApplyMode::DryRun)
            .apply(&plan(), &fx.locator, "default")
            .unwrap();

        assert!(runner.calls.is_empty());
        assert_eq!(report.applied_count(), 2);
        assert!(report.applied.iter().all(|m| m.stored.is_none()));
        assert!(report.applied[0].commands[0].starts_with("gcc -m32"));
        assert!(!fx.repository.target_dir().exists());
    }

    #[test]
    fn test_reapply_overwrites_active_with_lower_tier() {
        let fx = fixture(&["compute"]);
        let mut runner = FakeToolchain::default();
        let hot = PlanBuilder::default().build(
            &Profile::new(vec![ModuleProfile::new("compute", 1000, 0)]),
            "a.json",
        );
        let cool = PlanBuilder::default().build(
            &Profile::new(vec![ModuleProfile::new("compute", 5, 0)]),
            "b.json",
        );
        for plan in [&hot, &cool] {
            RecompileOrchestrator::new(&mut runner, &fx.toolchain, &fx.repository)
                .apply(plan, &fx.locator, "default")
                .unwrap();
        }
        let active = fs::read_to_string(fx.repository.active_path("default", "compute")).unwrap();
        assert!(active.starts_with("-O1 "));
        assert!(fx.repository.tiered_path("default", "compute", Tier::O3).exists());
    }
}
