use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use sysinfo::System;
use tracing::{debug, info};

use otterpgo_cache::{CacheRepository, Registry, RegistryEmitter};
use otterpgo_config::PgoConfig;
use otterpgo_profile::{Profile, ReportMarkers, parse_captured_profile};
use otterpgo_toolchain::{Invocation, ProcessRunner, run_checked};

/// The target project as seen by the pipeline: how to build it, how to run
/// it for a profile and where its registry sources live
#[derive(Debug, Clone)]
pub struct TargetEnvironment {
    root: PathBuf,
    build_program: String,
    clean: Invocation,
    build: Invocation,
    emulator: Invocation,
    markers: ReportMarkers,
    emitter: RegistryEmitter,
    default_tag: String,
}

impl TargetEnvironment {
    pub fn from_config(config: &PgoConfig) -> Self {
        let root = config.build.project_root.clone();
        let build = &config.build;
        let emulator = &config.emulator;
        Self {
            build_program: build.program.clone(),
            clean: Invocation::new(build.program.as_str(), build.clean_timeout())
                .args(build.clean_args.iter().cloned())
                .current_dir(&root),
            build: Invocation::new(build.program.as_str(), build.build_timeout())
                .args(build.build_args.iter().cloned())
                .current_dir(&root),
            emulator: Invocation::new(emulator.program.as_str(), emulator.timeout())
                .args(emulator.args.iter().cloned())
                .current_dir(&root),
            markers: ReportMarkers::new(
                emulator.begin_marker.as_str(),
                emulator.end_marker.as_str(),
            ),
            emitter: RegistryEmitter::from_config(&config.registry, &root),
            default_tag: config.cache.profile_tag.clone(),
            root,
        }
    }

    /// Clean build of the target image
    pub fn build<R: ProcessRunner + ?Sized>(&self, runner: &mut R) -> Result<()> {
        run_checked(&mut *runner, &self.clean)
            .with_context(|| format!("`{} clean` step failed", self.build_program))?;
        self.build_incremental(runner)
    }

    /// Build without cleaning, picking up regenerated registry sources
    pub fn build_incremental<R: ProcessRunner + ?Sized>(&self, runner: &mut R) -> Result<()> {
        run_checked(&mut *runner, &self.build)
            .with_context(|| format!("`{}` build failed", self.build_program))?;
        debug!(root = %self.root.display(), "target built");
        Ok(())
    }

    /// Run the target for one capture window and parse its report.
    ///
    /// The target never powers off, so the window normally ends at the
    /// deadline; only the captured output decides success.
    pub fn capture<R: ProcessRunner + ?Sized>(&self, runner: &mut R) -> Result<Profile> {
        let output = runner
            .run(&self.emulator)
            .context("failed to launch the emulator")?;
        debug!(
            timed_out = output.timed_out,
            status = ?output.status,
            stdout_bytes = output.stdout.len(),
            "capture window closed"
        );

        let mut profile = parse_captured_profile(
            &output.stdout,
            &output.stderr,
            &self.emulator.command_line(),
            &self.markers,
        )?;
        profile.stamp_provenance(
            &self.default_tag,
            System::host_name(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        info!(
            modules = profile.modules.len(),
            total_cycles = profile.total_cycles(),
            "captured profile"
        );
        Ok(profile)
    }

    /// Collect the active artifacts for `profile_tag` and emit the registry
    /// sources the target compiles in
    pub fn regenerate_registry(
        &self,
        repository: &CacheRepository,
        profile_tag: &str,
    ) -> Result<Registry> {
        let registry = Registry::generate(repository, profile_tag)
            .with_context(|| format!("failed to generate registry for tag `{profile_tag}`"))?;
        self.emitter
            .write(&registry)
            .context("failed to write registry sources")?;
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use otterpgo_config::Tier;
    use otterpgo_profile::ProfileError;
    use otterpgo_toolchain::{ToolError, ToolOutput};

    use super::*;

    struct Recorder {
        calls: Vec<Invocation>,
        qemu_stdout: String,
    }

    impl ProcessRunner for Recorder {
        fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
            self.calls.push(invocation.clone());
            if invocation.program == "qemu-system-i386" {
                return Ok(ToolOutput {
                    timed_out: true,
                    stdout: self.qemu_stdout.clone(),
                    ..ToolOutput::default()
                });
            }
            Ok(ToolOutput {
                status: Some(0),
                ..ToolOutput::default()
            })
        }
    }

    fn config(root: &Path) -> PgoConfig {
        let mut config = PgoConfig::default();
        config.build.project_root = root.to_path_buf();
        config
    }

    #[test]
    fn test_build_runs_clean_then_all() {
        let dir = tempfile::tempdir().unwrap();
        let env = TargetEnvironment::from_config(&config(dir.path()));
        let mut runner = Recorder {
            calls: Vec::new(),
            qemu_stdout: String::new(),
        };
        env.build(&mut runner).unwrap();

        let lines: Vec<String> = runner.calls.iter().map(Invocation::command_line).collect();
        assert_eq!(lines, ["make clean", "make all"]);
        assert_eq!(runner.calls[0].timeout.as_secs(), 30);
        assert_eq!(runner.calls[1].timeout.as_secs(), 120);
        assert_eq!(runner.calls[1].cwd.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_capture_accepts_timeout_and_stamps_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let env = TargetEnvironment::from_config(&config(dir.path()));
        let mut runner = Recorder {
            calls: Vec::new(),
            qemu_stdout: "boot\n--- BEGIN JSON ---\n{\"modules\": [{\"name\": \"sum\", \"calls\": 3, \"total_cycles\": 90}]}\n--- END JSON ---\n".to_string(),
        };
        let profile = env.capture(&mut runner).unwrap();
        assert_eq!(profile.total_cycles(), 90);
        assert_eq!(profile.profile_tag.as_deref(), Some("default"));
        assert!(profile.generated_at.is_some());
        assert_eq!(profile.num_modules, Some(1));
    }

    #[test]
    fn test_capture_without_markers_fails() {
        let dir = tempfile::tempdir().unwrap();
        let env = TargetEnvironment::from_config(&config(dir.path()));
        let mut runner = Recorder {
            calls: Vec::new(),
            qemu_stdout: "triple fault\n".to_string(),
        };
        let err = env.capture(&mut runner).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProfileError>(),
            Some(ProfileError::CaptureFormat { .. })
        ));
    }

    #[test]
    fn test_registry_then_incremental_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let env = TargetEnvironment::from_config(&config);
        let repository = CacheRepository::at(config.resolve(&config.cache.target_dir()));
        repository
            .write_artifact("default", "sum", Tier::O2, b"\x90\xc3")
            .unwrap();

        let mut runner = Recorder {
            calls: Vec::new(),
            qemu_stdout: String::new(),
        };
        let registry = env.regenerate_registry(&repository, "default").unwrap();
        env.build_incremental(&mut runner).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(runner.calls.len(), 1);
        assert_eq!(runner.calls[0].command_line(), "make all");

        let source = fs::read_to_string(dir.path().join("kernel/cache_registry.c")).unwrap();
        assert!(source.contains("fn(\"sum\", cache_module_sum, cache_module_sum_size, ctx);"));
        assert!(dir.path().join("build/cache_modules/cache_module_sum.c").exists());
    }
}
