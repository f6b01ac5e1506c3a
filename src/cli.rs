//! Command-line surface of the PGO pipeline

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use otterpgo_cache::CURRENT_VERSION;
use otterpgo_config::{PgoConfig, Tier};
use otterpgo_toolchain::DuctRunner;

use crate::commands;

#[derive(Debug, Parser)]
#[command(name = "otterpgo")]
#[command(
    author,
    version,
    about = "Offline profile-guided recompilation for module-based runtimes"
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root of the target project; overrides the configured one
    #[arg(long, global = true, value_name = "DIR")]
    pub project_root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Classify a captured profile into a recompilation plan, optionally applying it
    Plan(PlanArgs),

    /// Regenerate the module registry sources from the cache
    Registry(RegistryArgs),

    /// Prefix a module payload with the fixed module header
    #[command(disable_version_flag = true)]
    Wrap(WrapArgs),

    /// Print the header of a wrapped module
    Inspect(InspectArgs),

    /// Copy active cache artifacts onto the target's disk image
    SyncDisk(SyncDiskArgs),

    /// Run build/capture/recompile iterations until the gain converges
    Iterate(IterateArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Profile JSON exported by the target
    #[arg(value_name = "PROFILE")]
    pub profile: PathBuf,

    /// Calls at which a module counts as hot
    #[arg(long)]
    pub call_threshold: Option<u64>,

    /// Total cycles at which a module counts as hot
    #[arg(long)]
    pub cycle_threshold: Option<u64>,

    /// Write the plan as JSON
    #[arg(long, value_name = "FILE")]
    pub plan_out: Option<PathBuf>,

    /// Recompile the planned modules into the cache
    #[arg(long)]
    pub apply: bool,

    /// Directory holding module sources
    #[arg(long, value_name = "DIR")]
    pub module_dir: Option<PathBuf>,

    /// Cache target directory (e.g. cache/i686)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Cache tag; defaults to the profile's own tag
    #[arg(long)]
    pub profile_tag: Option<String>,

    /// Show the recompile commands without running them
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct RegistryArgs {
    /// Cache target directory (e.g. cache/i686)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[arg(long)]
    pub profile_tag: Option<String>,

    /// Registry source file to generate
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct WrapArgs {
    /// Raw module payload
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Wrapped module to write
    #[arg(long, value_name = "FILE")]
    pub output: PathBuf,

    /// Module name (at most 32 bytes)
    #[arg(long)]
    pub name: String,

    /// Entry symbol (at most 64 bytes)
    #[arg(long)]
    pub entry: String,

    /// Optimization level (0-3 or O0-O3)
    #[arg(long, default_value = "O0")]
    pub opt: Tier,

    /// Header format version
    #[arg(long, default_value_t = CURRENT_VERSION)]
    pub version: u32,
}

#[derive(Debug, Clone, Args)]
pub struct InspectArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct SyncDiskArgs {
    /// Profile JSON or a plan written by `plan --plan-out`
    #[arg(value_name = "PROFILE_OR_PLAN")]
    pub input: PathBuf,

    /// FAT disk image to copy into
    #[arg(long, value_name = "IMAGE")]
    pub disk: Option<PathBuf>,

    #[arg(long)]
    pub profile_tag: Option<String>,

    /// List the copies without touching the image
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct IterateArgs {
    /// Optimization iterations after the baseline
    #[arg(long)]
    pub max_iterations: Option<u32>,

    /// Stop once an iteration improves by less than this fraction
    #[arg(long)]
    pub convergence_threshold: Option<f64>,

    /// Where to save the JSON report
    #[arg(long, value_name = "FILE")]
    pub report_out: Option<PathBuf>,
}

impl Cli {
    /// Configuration from `--config` (or defaults), then environment, then
    /// global flags
    pub fn load_config(&self) -> Result<PgoConfig> {
        let mut config = match &self.config {
            Some(path) => PgoConfig::from_file(path)?.merge_with_env(),
            None => PgoConfig::from_env(),
        };
        if let Some(root) = &self.project_root {
            config.build.project_root = root.clone();
        }
        Ok(config)
    }
}

pub fn run(cli: Cli) -> Result<()> {
    let mut config = cli.load_config()?;
    let mut runner = DuctRunner::new();

    match cli.command {
        Commands::Plan(args) => commands::plan(&args, &config, &mut runner),
        Commands::Registry(args) => commands::registry(&args, &config),
        Commands::Wrap(args) => commands::wrap(&args),
        Commands::Inspect(args) => commands::inspect(&args),
        Commands::SyncDisk(args) => commands::sync_disk(&args, &config, &mut runner),
        Commands::Iterate(args) => {
            if let Some(max) = args.max_iterations {
                config.convergence.max_iterations = max;
            }
            if let Some(threshold) = args.convergence_threshold {
                config.convergence.convergence_threshold = threshold;
            }
            commands::iterate(&args, &config, &mut runner)
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_plan_flags() {
        let cli = Cli::parse_from([
            "otterpgo",
            "plan",
            "profile.json",
            "--call-threshold",
            "50",
            "--apply",
            "--dry-run",
            "--profile-tag",
            "bench",
        ]);
        match cli.command {
            Commands::Plan(args) => {
                assert_eq!(args.profile, PathBuf::from("profile.json"));
                assert_eq!(args.call_threshold, Some(50));
                assert_eq!(args.cycle_threshold, None);
                assert!(args.apply && args.dry_run);
                assert_eq!(args.profile_tag.as_deref(), Some("bench"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_wrap_opt_accepts_both_spellings() {
        for (spelling, tier) in [("2", Tier::O2), ("O3", Tier::O3)] {
            let cli = Cli::parse_from([
                "otterpgo", "wrap", "--input", "a.bc", "--output", "b.bc", "--name", "sum",
                "--entry", "module_sum", "--opt", spelling,
            ]);
            match cli.command {
                Commands::Wrap(args) => {
                    assert_eq!(args.opt, tier);
                    assert_eq!(args.version, CURRENT_VERSION);
                }
                other => panic!("unexpected command {other:?}"),
            }
        }
        assert!(
            Cli::try_parse_from([
                "otterpgo", "wrap", "--input", "a", "--output", "b", "--name", "n", "--entry",
                "e", "--opt", "7",
            ])
            .is_err()
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["otterpgo", "iterate", "--max-iterations", "5", "-v"]);
        assert!(cli.verbose);
        let config = Cli::parse_from(["otterpgo", "--project-root", "/srv/kernel", "inspect", "m"])
            .load_config()
            .unwrap();
        assert_eq!(config.build.project_root, PathBuf::from("/srv/kernel"));
        match cli.command {
            Commands::Iterate(args) => assert_eq!(args.max_iterations, Some(5)),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
