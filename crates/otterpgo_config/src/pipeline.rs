//! Pipeline configuration
//!
//! Centralized configuration for every stage of the PGO cycle: classification
//! thresholds, the recompilation toolchain, the target build driver, the
//! emulator used for profile capture, the module cache, the generated
//! registry, the removable-disk transport and the convergence loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::tier::ThresholdConfig;

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|val| val.parse().ok())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct PgoConfig {
    /// Classification thresholds
    pub thresholds: ThresholdConfig,

    /// Compiler and binary extraction toolchain
    pub toolchain: ToolchainConfig,

    /// Target build driver
    pub build: BuildConfig,

    /// Execution environment used to capture profiles
    pub emulator: EmulatorConfig,

    /// Module cache layout
    pub cache: CacheConfig,

    /// Generated registry sources
    pub registry: RegistryConfig,

    /// Removable-disk transport
    pub disk: DiskConfig,

    /// Multi-iteration convergence loop
    pub convergence: ConvergenceConfig,
}

impl PgoConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::default().merge_with_env()
    }

    /// Load configuration from TOML file
    #[cfg(feature = "toml-config")]
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: PgoConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn from_file(_path: &Path) -> anyhow::Result<Self> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Save configuration to TOML file
    #[cfg(feature = "toml-config")]
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Save configuration to TOML file (stub when toml feature is disabled)
    #[cfg(not(feature = "toml-config"))]
    pub fn save_to_file(&self, _path: &Path) -> anyhow::Result<()> {
        anyhow::bail!("TOML support not enabled. Enable the 'toml-config' feature.")
    }

    /// Merge with environment variables (env vars take precedence)
    pub fn merge_with_env(mut self) -> Self {
        self.thresholds.apply_env();
        self.toolchain.apply_env();
        self.build.apply_env();
        self.emulator.apply_env();
        self.cache.apply_env();
        self.disk.apply_env();
        self.convergence.apply_env();
        self
    }

    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.build.project_root.join(path)
        }
    }
}

/// Compiler and binary extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// C compiler driver
    pub compiler: String,

    /// Flags passed on every compile, before the tier flag
    pub baseline_flags: Vec<String>,

    /// Tool converting an object file into a raw binary blob
    pub extractor: String,

    /// Arguments passed to the extractor before input and output paths
    pub extractor_args: Vec<String>,

    /// Directory holding module sources (`<name>.<source_extension>`)
    pub module_dir: PathBuf,

    /// Extension of module source files
    pub source_extension: String,

    /// Fallback sources for modules whose canonical file is absent
    pub aliases: BTreeMap<String, PathBuf>,

    /// Timeout for a single compiler invocation (seconds)
    pub compile_timeout_secs: u64,

    /// Timeout for a single extractor invocation (seconds)
    pub extract_timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: "gcc".to_string(),
            baseline_flags: strings(&[
                "-m32",
                "-ffreestanding",
                "-nostdlib",
                "-fno-stack-protector",
                "-fno-pic",
            ]),
            extractor: "objcopy".to_string(),
            extractor_args: strings(&["-O", "binary"]),
            module_dir: PathBuf::from("modules"),
            source_extension: "c".to_string(),
            aliases: BTreeMap::new(),
            compile_timeout_secs: 60,
            extract_timeout_secs: 30,
        }
    }
}

impl ToolchainConfig {
    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OTTERPGO_CC") {
            self.compiler = val;
        }
        if let Ok(val) = std::env::var("OTTERPGO_OBJCOPY") {
            self.extractor = val;
        }
        if let Ok(val) = std::env::var("OTTERPGO_MODULE_DIR") {
            self.module_dir = PathBuf::from(val);
        }
        if let Some(secs) = env_value("OTTERPGO_COMPILE_TIMEOUT_SECS") {
            self.compile_timeout_secs = secs;
        }
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }
}

/// Target build driver configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Root of the target project; relative paths resolve against it
    pub project_root: PathBuf,

    /// Build driver program
    pub program: String,

    /// Arguments cleaning previous build outputs
    pub clean_args: Vec<String>,

    /// Arguments producing the bootable target image
    pub build_args: Vec<String>,

    pub clean_timeout_secs: u64,

    pub build_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            program: "make".to_string(),
            clean_args: strings(&["clean"]),
            build_args: strings(&["all"]),
            clean_timeout_secs: 30,
            build_timeout_secs: 120,
        }
    }
}

impl BuildConfig {
    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OTTERPGO_PROJECT_ROOT") {
            self.project_root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OTTERPGO_MAKE") {
            self.program = val;
        }
        if let Some(secs) = env_value("OTTERPGO_BUILD_TIMEOUT_SECS") {
            self.build_timeout_secs = secs;
        }
    }

    pub fn clean_timeout(&self) -> Duration {
        Duration::from_secs(self.clean_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }
}

/// Execution environment used to capture profiling reports
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EmulatorConfig {
    pub program: String,

    /// Arguments; the serial console must be routed to stdout
    pub args: Vec<String>,

    /// Length of the capture window (seconds)
    pub timeout_secs: u64,

    /// Line opening the structured report in captured output
    pub begin_marker: String,

    /// Line closing the structured report in captured output
    pub end_marker: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            program: "qemu-system-i386".to_string(),
            args: strings(&[
                "-drive",
                "file=fluid.img,format=raw",
                "-serial",
                "stdio",
                "-display",
                "none",
            ]),
            timeout_secs: 15,
            begin_marker: "--- BEGIN JSON ---".to_string(),
            end_marker: "--- END JSON ---".to_string(),
        }
    }
}

impl EmulatorConfig {
    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OTTERPGO_EMULATOR") {
            self.program = val;
        }
        if let Some(secs) = env_value("OTTERPGO_CAPTURE_TIMEOUT_SECS") {
            self.timeout_secs = secs;
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Module cache layout: `<root>/<target>/<profile_tag>/`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    pub root: PathBuf,

    pub target: String,

    /// Tag used when a profile does not carry its own
    pub profile_tag: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cache"),
            target: "i686".to_string(),
            profile_tag: "default".to_string(),
        }
    }
}

impl CacheConfig {
    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OTTERPGO_CACHE_ROOT") {
            self.root = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("OTTERPGO_TARGET") {
            self.target = val;
        }
        if let Ok(val) = std::env::var("OTTERPGO_PROFILE_TAG") {
            self.profile_tag = val;
        }
    }

    /// Directory holding every profile tag for the configured target
    pub fn target_dir(&self) -> PathBuf {
        self.root.join(&self.target)
    }
}

/// Generated registry sources compiled into the runtime image
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry translation unit exposing `cache_registry_foreach`
    pub source_path: PathBuf,

    /// Directory receiving one embedded-array source per module
    pub embed_dir: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("kernel/cache_registry.c"),
            embed_dir: PathBuf::from("build/cache_modules"),
        }
    }
}

/// Removable-disk transport (`mcopy` onto a FAT image)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiskConfig {
    pub program: String,

    pub image: PathBuf,

    pub timeout_secs: u64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            program: "mcopy".to_string(),
            image: PathBuf::from("build/fat16_test.img"),
            timeout_secs: 30,
        }
    }
}

impl DiskConfig {
    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OTTERPGO_MCOPY") {
            self.program = val;
        }
        if let Ok(val) = std::env::var("OTTERPGO_DISK_IMAGE") {
            self.image = PathBuf::from(val);
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Multi-iteration convergence loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConvergenceConfig {
    /// Maximum number of optimization iterations after the baseline
    pub max_iterations: u32,

    /// Stop once the fractional improvement drops below this value
    pub convergence_threshold: f64,

    /// Directory receiving captured profiles and per-iteration plans
    pub work_dir: PathBuf,

    /// Final JSON report
    pub report_path: PathBuf,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            convergence_threshold: 0.02,
            work_dir: PathBuf::from("build/pgo"),
            report_path: PathBuf::from("build/pgo_report.json"),
        }
    }
}

impl ConvergenceConfig {
    fn apply_env(&mut self) {
        if let Some(max) = env_value("OTTERPGO_MAX_ITERATIONS") {
            self.max_iterations = max;
        }
        if let Some(threshold) = env_value("OTTERPGO_CONVERGENCE_THRESHOLD") {
            self.convergence_threshold = threshold;
        }
        if let Ok(val) = std::env::var("OTTERPGO_WORK_DIR") {
            self.work_dir = PathBuf::from(val);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_workflow() {
        let config = PgoConfig::default();
        assert_eq!(config.thresholds.call_threshold, 100);
        assert_eq!(config.thresholds.cycle_threshold, 100_000);
        assert_eq!(config.convergence.max_iterations, 3);
        assert!((config.convergence.convergence_threshold - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.cache.target_dir(), PathBuf::from("cache/i686"));
        assert!(
            config
                .toolchain
                .baseline_flags
                .iter()
                .any(|flag| flag == "-ffreestanding")
        );
    }

    #[test]
    fn test_resolve_relative_to_project_root() {
        let mut config = PgoConfig::default();
        config.build.project_root = PathBuf::from("/work/kernel");
        assert_eq!(
            config.resolve(Path::new("cache")),
            PathBuf::from("/work/kernel/cache")
        );
        assert_eq!(
            config.resolve(Path::new("/tmp/cache")),
            PathBuf::from("/tmp/cache")
        );
    }

    #[test]
    fn test_timeouts_are_seconds() {
        let config = PgoConfig::default();
        assert_eq!(config.build.build_timeout(), Duration::from_secs(120));
        assert_eq!(config.emulator.timeout(), Duration::from_secs(15));
        assert_eq!(config.toolchain.compile_timeout(), Duration::from_secs(60));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: PgoConfig = toml::from_str(
            r#"
            [convergence]
            max_iterations = 5

            [thresholds]
            call_threshold = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.convergence.max_iterations, 5);
        assert_eq!(config.thresholds.call_threshold, 50);
        assert_eq!(config.thresholds.cycle_threshold, 100_000);
        assert_eq!(config.emulator.program, "qemu-system-i386");
    }
}
