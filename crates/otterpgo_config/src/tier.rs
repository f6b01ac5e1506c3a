use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Optimization tiers assigned to modules from their profiling counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    /// Cold: the module never ran while profiling
    O0 = 0,

    /// Warm: executed, but below both hot thresholds
    O1 = 1,

    /// Hot: at or above the call or cycle threshold
    O2 = 2,

    /// Ultra-hot: at or above ten times either threshold
    O3 = 3,
}

impl Tier {
    /// All tiers, coldest first
    pub const ALL: [Tier; 4] = [Tier::O0, Tier::O1, Tier::O2, Tier::O3];

    /// Numeric optimization level (0-3), as stored in module headers
    pub fn level(self) -> u32 {
        self as u32
    }

    /// Inverse of [`Tier::level`]
    pub fn from_level(level: u32) -> Option<Tier> {
        match level {
            0 => Some(Tier::O0),
            1 => Some(Tier::O1),
            2 => Some(Tier::O2),
            3 => Some(Tier::O3),
            _ => None,
        }
    }

    /// Compiler flag selecting this optimization level
    pub fn compiler_flag(self) -> &'static str {
        match self {
            Tier::O0 => "-O0",
            Tier::O1 => "-O1",
            Tier::O2 => "-O2",
            Tier::O3 => "-O3",
        }
    }

    /// Filename suffix used for tiered cache artifacts (`compute_O2.mod`)
    pub fn suffix(self) -> &'static str {
        match self {
            Tier::O0 => "_O0",
            Tier::O1 => "_O1",
            Tier::O2 => "_O2",
            Tier::O3 => "_O3",
        }
    }

    /// Get tier name for display
    pub fn name(self) -> &'static str {
        match self {
            Tier::O0 => "O0",
            Tier::O1 => "O1",
            Tier::O2 => "O2",
            Tier::O3 => "O3",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('O')
            .or_else(|| trimmed.strip_prefix('o'))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .ok()
            .and_then(Tier::from_level)
            .ok_or_else(|| format!("invalid optimization tier `{s}` (expected O0-O3)"))
    }
}

/// Thresholds driving hot-module classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Call count at which a module is considered hot
    pub call_threshold: u64,

    /// Total cycle count at which a module is considered hot
    pub cycle_threshold: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            call_threshold: 100,
            cycle_threshold: 100_000,
        }
    }
}

impl ThresholdConfig {
    pub fn new(call_threshold: u64, cycle_threshold: u64) -> Self {
        Self {
            call_threshold,
            cycle_threshold,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub(crate) fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("OTTERPGO_CALL_THRESHOLD") {
            self.call_threshold = val.parse().unwrap_or(self.call_threshold);
        }

        if let Ok(val) = std::env::var("OTTERPGO_CYCLE_THRESHOLD") {
            self.cycle_threshold = val.parse().unwrap_or(self.cycle_threshold);
        }
    }

    /// Thresholds for the ultra-hot tier (ten times the hot thresholds)
    pub fn ultra_hot(&self) -> (u64, u64) {
        (
            self.call_threshold.saturating_mul(10),
            self.cycle_threshold.saturating_mul(10),
        )
    }
}
