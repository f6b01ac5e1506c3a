//! The multi-iteration PGO cycle: build the target, capture a profile,
//! plan, recompile, regenerate the registry, rebuild and measure again

pub mod controller;
pub mod environment;
pub mod report;

pub use controller::{
    ConvergenceController, IterationResult, Outcome, RunState, Stage, improvement,
};
pub use environment::TargetEnvironment;
pub use report::{IterationRow, PhaseRow, ReportSummary, RunReport};
