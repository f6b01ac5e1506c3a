use std::fmt;

use serde::{Deserialize, Serialize};

use otterpgo_config::{ThresholdConfig, Tier};

use crate::model::ModuleProfile;

/// Why a module landed in its tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeatReason {
    UltraHot,
    Hot,
    Warm,
    Cold,
}

impl HeatReason {
    /// Short label, e.g. `ultra-hot`
    pub fn label(self) -> &'static str {
        match self {
            HeatReason::UltraHot => "ultra-hot",
            HeatReason::Hot => "hot",
            HeatReason::Warm => "warm",
            HeatReason::Cold => "cold",
        }
    }

    /// Label plus the rule that matched, as recorded in plans
    pub fn description(self) -> &'static str {
        match self {
            HeatReason::UltraHot => "ultra-hot (>=10x threshold)",
            HeatReason::Hot => "hot (>= threshold)",
            HeatReason::Warm => "warm (executed but below threshold)",
            HeatReason::Cold => "cold (never executed)",
        }
    }
}

impl fmt::Display for HeatReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub tier: Tier,
    pub reason: HeatReason,
}

const COLD: Classification = Classification {
    tier: Tier::O0,
    reason: HeatReason::Cold,
};

/// Map counters to a tier. Rules are checked in order, first match wins:
/// ultra-hot at ten times either threshold, hot at either threshold, warm
/// when executed at all, cold otherwise.
///
/// A module with no calls is cold whatever its cycle counter says.
pub fn classify(
    calls: u64,
    total_cycles: u64,
    call_threshold: u64,
    cycle_threshold: u64,
) -> Classification {
    if calls == 0 {
        return COLD;
    }
    let (ultra_calls, ultra_cycles) =
        ThresholdConfig::new(call_threshold, cycle_threshold).ultra_hot();
    if calls >= ultra_calls || total_cycles >= ultra_cycles {
        return Classification {
            tier: Tier::O3,
            reason: HeatReason::UltraHot,
        };
    }
    if calls >= call_threshold || total_cycles >= cycle_threshold {
        return Classification {
            tier: Tier::O2,
            reason: HeatReason::Hot,
        };
    }
    Classification {
        tier: Tier::O1,
        reason: HeatReason::Warm,
    }
}

/// Classifies modules against a fixed set of thresholds
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    thresholds: ThresholdConfig,
}

impl Classifier {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }

    pub fn classify_module(&self, module: &ModuleProfile) -> Classification {
        classify(
            module.calls,
            module.total_cycles,
            self.thresholds.call_threshold,
            self.thresholds.cycle_threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CALLS: u64 = 100;
    const CYCLES: u64 = 100_000;

    #[test]
    fn test_zero_calls_is_always_cold() {
        for cycles in [0, 1, CYCLES, CYCLES * 10, u64::MAX] {
            let result = classify(0, cycles, CALLS, CYCLES);
            assert_eq!(result.tier, Tier::O0);
            assert_eq!(result.reason, HeatReason::Cold);
        }
    }

    #[test]
    fn test_ultra_hot_by_calls() {
        let result = classify(1000, 2_000_000, CALLS, CYCLES);
        assert_eq!(result.tier, Tier::O3);
        assert_eq!(result.reason.label(), "ultra-hot");
    }

    #[test]
    fn test_rules_in_priority_order() {
        assert_eq!(classify(10, 1_000_000, CALLS, CYCLES).tier, Tier::O3);
        assert_eq!(classify(100, 0, CALLS, CYCLES).tier, Tier::O2);
        assert_eq!(classify(1, 100_000, CALLS, CYCLES).tier, Tier::O2);
        assert_eq!(classify(99, 99_999, CALLS, CYCLES).tier, Tier::O1);
        assert_eq!(classify(999, 999_999, CALLS, CYCLES).tier, Tier::O2);
    }

    #[test]
    fn test_reason_descriptions() {
        assert_eq!(
            classify(5, 10, CALLS, CYCLES).reason.to_string(),
            "warm (executed but below threshold)"
        );
        assert_eq!(HeatReason::Hot.description(), "hot (>= threshold)");
    }

    #[test]
    fn test_monotonic_in_both_counters() {
        let samples = [
            0u64, 1, 50, 99, 100, 101, 500, 999, 1000, 5_000, 99_999, 100_000, 500_000,
            999_999, 1_000_000, 10_000_000,
        ];
        for &calls in &samples {
            for &cycles in &samples {
                let base = classify(calls, cycles, CALLS, CYCLES).tier;
                for &more in samples.iter().filter(|&&s| s >= calls) {
                    assert!(classify(more, cycles, CALLS, CYCLES).tier >= base);
                }
                for &more in samples.iter().filter(|&&s| s >= cycles) {
                    assert!(classify(calls, more, CALLS, CYCLES).tier >= base);
                }
            }
        }
    }

    #[test]
    fn test_huge_thresholds_do_not_overflow() {
        let result = classify(u64::MAX, 0, u64::MAX, u64::MAX);
        assert_eq!(result.tier, Tier::O3);
    }

    #[test]
    fn test_classifier_uses_thresholds() {
        let classifier = Classifier::new(ThresholdConfig::new(10, 1_000));
        let module = ModuleProfile::new("fib", 10, 50);
        assert_eq!(classifier.classify_module(&module).tier, Tier::O2);
        assert_eq!(classifier.thresholds().call_threshold, 10);
    }
}
