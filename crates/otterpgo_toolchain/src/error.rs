use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use otterpgo_cache::CacheError;

/// Failure of an external process
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "`{command}` failed ({})\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}",
        describe_status(.status)
    )]
    Failed {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error(
        "`{command}` timed out after {}s\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}",
        .timeout.as_secs()
    )]
    TimedOut {
        command: String,
        timeout: Duration,
        stdout: String,
        stderr: String,
    },
}

impl ToolError {
    pub fn command(&self) -> &str {
        match self {
            ToolError::Spawn { command, .. }
            | ToolError::Failed { command, .. }
            | ToolError::TimedOut { command, .. } => command,
        }
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Why a recompile apply stopped
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("recompiling `{module}`: {source}")]
    Tool {
        module: String,
        #[source]
        source: ToolError,
    },

    #[error("caching `{module}`: {source}")]
    Cache {
        module: String,
        #[source]
        source: CacheError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
