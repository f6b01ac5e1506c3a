use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::capture::CaptureIssue;

#[derive(Debug, Error)]
pub enum ProfileError {
    /// The report parsed but is missing required fields or is inconsistent
    #[error("invalid profile from {origin}: {message}")]
    Validation { origin: String, message: String },

    /// The captured output did not contain a usable report
    #[error(
        "profile capture failed: {issue}\ncommand: {command}\nstdout:\n{stdout}\nstderr:\n{stderr}"
    )]
    CaptureFormat {
        issue: CaptureIssue,
        command: String,
        stdout: String,
        stderr: String,
    },

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse JSON from {origin}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProfileError {
    pub(crate) fn validation(origin: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}
