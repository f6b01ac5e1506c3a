//! External tools driven by the pipeline: compiler, binary extractor and
//! disk transport, all behind the [`ProcessRunner`] capability

pub mod disk;
pub mod error;
pub mod locator;
pub mod recompile;
pub mod runner;

pub use disk::{DiskCopy, DiskError, DiskTransport, SyncMode, SyncReport, disk_name};
pub use error::{ApplyError, ToolError};
pub use locator::{MissingSource, SourceLocator};
pub use recompile::{AppliedModule, ApplyMode, ApplyReport, RecompileOrchestrator};
pub use runner::{DuctRunner, Invocation, ProcessRunner, ToolOutput, run_checked};
