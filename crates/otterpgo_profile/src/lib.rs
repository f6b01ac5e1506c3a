//! Profile ingestion, hot-module classification and recompilation planning

pub mod capture;
pub mod classifier;
pub mod error;
pub mod model;
pub mod plan;

pub use capture::{
    CaptureIssue, ReportMarkers, ReportScanner, extract_report, parse_captured_profile,
};
pub use classifier::{Classification, Classifier, HeatReason, classify};
pub use error::ProfileError;
pub use model::{ModuleProfile, Profile};
pub use plan::{Plan, PlanArtifact, PlanBuilder, PlanEntry, PlanProvenance};
