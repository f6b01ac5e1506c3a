//! Convergence controller
//!
//! ```text
//! Baseline ──> Iterating(1) ──> ... ──> Iterating(n) ──> NotConverged
//!    │              │                        │
//!    └──────────────┴──> Failed              └──> Converged
//! ```
//!
//! Iteration 0 builds and measures the stock target. Every later iteration
//! builds, captures, plans, applies the plan, regenerates the registry,
//! rebuilds and measures again. The run converges once an iteration improves
//! on the previous one by less than the configured fraction. A failing step
//! ends the run; results recorded before it are kept and still reported.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use otterpgo_cache::CacheRepository;
use otterpgo_config::{PgoConfig, Tier};
use otterpgo_profile::{ModuleProfile, Plan, PlanBuilder, Profile};
use otterpgo_toolchain::{ProcessRunner, RecompileOrchestrator, SourceLocator};
use otterpgo_utils::{Profiler, Stopwatch};

use super::environment::TargetEnvironment;
use super::report::RunReport;

/// Steps of an iteration, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    Capture,
    Plan,
    Apply,
    Registry,
    Rebuild,
    Measure,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Capture => "capture",
            Stage::Plan => "plan",
            Stage::Apply => "apply",
            Stage::Registry => "registry",
            Stage::Rebuild => "rebuild",
            Stage::Measure => "measure",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Baseline,
    Iterating(u32),
    Converged,
    NotConverged,
    Failed,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Converged {
        iteration: u32,
        improvement: f64,
    },
    NotConverged {
        iterations: u32,
    },
    Failed {
        iteration: u32,
        stage: Stage,
        reason: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Outcome::Failed { .. })
    }

    pub fn state(&self) -> RunState {
        match self {
            Outcome::Converged { .. } => RunState::Converged,
            Outcome::NotConverged { .. } => RunState::NotConverged,
            Outcome::Failed { .. } => RunState::Failed,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Converged {
                iteration,
                improvement,
            } => write!(
                f,
                "converged after iteration {iteration} ({:.2}% improvement)",
                improvement * 100.0
            ),
            Outcome::NotConverged { iterations } => {
                write!(f, "not converged after {iterations} iterations")
            }
            Outcome::Failed {
                iteration,
                stage,
                reason,
            } => write!(f, "failed at {stage} in iteration {iteration}: {reason}"),
        }
    }
}

/// Measurement recorded for one completed iteration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationResult {
    pub index: u32,
    pub is_baseline: bool,
    pub total_cycles: u64,
    pub modules: Vec<ModuleProfile>,
    pub duration_ms: u64,
}

/// Fractional improvement of `current` over `previous`. Zero when there is
/// nothing to improve on; negative for a regression.
pub fn improvement(previous: u64, current: u64) -> f64 {
    if previous == 0 {
        return 0.0;
    }
    (previous as f64 - current as f64) / previous as f64
}

struct StepFailure {
    stage: Stage,
    error: anyhow::Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StepFailure>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: Stage) -> Result<T, StepFailure> {
        self.map_err(|error| StepFailure { stage, error })
    }
}

pub struct ConvergenceController<'a, R: ProcessRunner + ?Sized> {
    runner: &'a mut R,
    config: &'a PgoConfig,
    environment: TargetEnvironment,
    repository: CacheRepository,
    locator: SourceLocator,
    work_dir: PathBuf,
    state: RunState,
    results: Vec<IterationResult>,
    profiler: Profiler,
}

impl<'a, R: ProcessRunner + ?Sized> ConvergenceController<'a, R> {
    pub fn new(runner: &'a mut R, config: &'a PgoConfig) -> Self {
        let root = config.build.project_root.as_path();
        Self {
            runner,
            environment: TargetEnvironment::from_config(config),
            repository: CacheRepository::at(config.resolve(&config.cache.target_dir())),
            locator: SourceLocator::from_config(&config.toolchain, root),
            work_dir: config.resolve(&config.convergence.work_dir),
            state: RunState::Baseline,
            results: Vec::new(),
            profiler: Profiler::new(),
            config,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn results(&self) -> &[IterationResult] {
        &self.results
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Drive the run to a terminal state and report on it
    pub fn run(&mut self) -> RunReport {
        let outcome = self.drive();
        self.state = outcome.state();
        match &outcome {
            Outcome::Failed { .. } => error!("PGO run {outcome}"),
            _ => info!("PGO run {outcome}"),
        }
        let phases = self.profiler.summary();
        for phase in &phases {
            info!(phase = %phase.name, elapsed_ms = phase.duration.as_millis(), "phase total");
        }
        RunReport::new(self.results.clone(), outcome).with_phases(&phases)
    }

    fn drive(&mut self) -> Outcome {
        let convergence = &self.config.convergence;
        info!(
            max_iterations = convergence.max_iterations,
            threshold = convergence.convergence_threshold,
            "starting PGO run"
        );

        self.state = RunState::Baseline;
        match self.baseline() {
            Ok(result) => {
                info!(total_cycles = result.total_cycles, "baseline complete");
                self.results.push(result);
            }
            Err(failure) => return failed(0, failure),
        }

        let max_iterations = self.config.convergence.max_iterations;
        let threshold = self.config.convergence.convergence_threshold;
        for index in 1..=max_iterations {
            self.state = RunState::Iterating(index);
            let result = match self.iterate(index) {
                Ok(result) => result,
                Err(failure) => return failed(index, failure),
            };

            let previous = self
                .results
                .last()
                .map_or(0, |previous| previous.total_cycles);
            let gain = improvement(previous, result.total_cycles);
            info!(
                iteration = index,
                total_cycles = result.total_cycles,
                improvement_percent = gain * 100.0,
                "iteration complete"
            );
            if gain < 0.0 {
                warn!(iteration = index, "iteration regressed");
            }
            self.results.push(result);

            if gain < threshold {
                return Outcome::Converged {
                    iteration: index,
                    improvement: gain,
                };
            }
        }

        Outcome::NotConverged {
            iterations: max_iterations,
        }
    }

    fn baseline(&mut self) -> Result<IterationResult, StepFailure> {
        let stopwatch = Stopwatch::start_new();
        self.build().at(Stage::Build)?;
        let profile = self.capture(0, false).at(Stage::Capture)?;
        Ok(IterationResult {
            index: 0,
            is_baseline: true,
            total_cycles: profile.total_cycles(),
            modules: profile.modules,
            duration_ms: stopwatch.elapsed_ms(),
        })
    }

    fn iterate(&mut self, index: u32) -> Result<IterationResult, StepFailure> {
        let stopwatch = Stopwatch::start_new();
        self.build().at(Stage::Build)?;
        let profile = self.capture(index, false).at(Stage::Capture)?;
        let profile_source = self.profile_path(index, false);
        let plan = self.plan(index, &profile, &profile_source).at(Stage::Plan)?;

        let tag = profile.tag_or(&self.config.cache.profile_tag).to_string();
        self.apply(&plan, &tag).at(Stage::Apply)?;
        self.regenerate_registry(&tag).at(Stage::Registry)?;
        self.rebuild().at(Stage::Rebuild)?;
        let measured = self.capture(index, true).at(Stage::Measure)?;

        Ok(IterationResult {
            index,
            is_baseline: false,
            total_cycles: measured.total_cycles(),
            modules: measured.modules,
            duration_ms: stopwatch.elapsed_ms(),
        })
    }

    fn build(&mut self) -> Result<()> {
        let Self {
            runner,
            environment,
            profiler,
            ..
        } = self;
        profiler.record_phase("build", || environment.build(&mut **runner))
    }

    /// Capture a profile and persist it in the work directory
    fn capture(&mut self, index: u32, optimized: bool) -> Result<Profile> {
        let Self {
            runner,
            environment,
            profiler,
            ..
        } = self;
        let profile = profiler.record_phase("capture", || environment.capture(&mut **runner))?;

        let path = self.profile_path(index, optimized);
        let json = profile.to_json().context("failed to serialize profile")?;
        write_file(&path, &json)?;
        info!(path = %path.display(), "saved captured profile");
        Ok(profile)
    }

    fn plan(&self, index: u32, profile: &Profile, profile_source: &Path) -> Result<Plan> {
        let plan = PlanBuilder::new(self.config.thresholds.clone())
            .build(profile, &profile_source.display().to_string());
        let path = self.work_dir.join(format!("pgo_plan_iter{index}.json"));
        plan.save(&path)?;
        let counts = plan.tier_counts();
        info!(
            iteration = index,
            modules = plan.len(),
            o3 = counts.get(&Tier::O3).copied().unwrap_or(0),
            "planned recompilation"
        );
        Ok(plan)
    }

    fn apply(&mut self, plan: &Plan, tag: &str) -> Result<()> {
        let Self {
            runner,
            config,
            repository,
            locator,
            profiler,
            ..
        } = self;
        let report = profiler.record_phase("apply", || {
            RecompileOrchestrator::new(&mut **runner, &config.toolchain, repository)
                .apply(plan, locator, tag)
        })?;
        if !report.missing.is_empty() {
            warn!(
                missing = report.missing.len(),
                "some planned modules have no source"
            );
        }
        Ok(())
    }

    fn regenerate_registry(&mut self, tag: &str) -> Result<()> {
        let registry = self
            .environment
            .regenerate_registry(&self.repository, tag)?;
        info!(modules = registry.len(), tag, "regenerated module registry");
        Ok(())
    }

    fn rebuild(&mut self) -> Result<()> {
        let Self {
            runner,
            environment,
            profiler,
            ..
        } = self;
        profiler.record_phase("rebuild", || environment.build_incremental(&mut **runner))
    }

    fn profile_path(&self, index: u32, optimized: bool) -> PathBuf {
        let suffix = if optimized { "_optimized" } else { "" };
        self.work_dir
            .join(format!("pgo_iteration_{index}{suffix}.json"))
    }
}

fn failed(iteration: u32, failure: StepFailure) -> Outcome {
    Outcome::Failed {
        iteration,
        stage: failure.stage,
        reason: format!("{:#}", failure.error),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
