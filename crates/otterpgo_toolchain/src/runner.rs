use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::ToolError;

/// One external command with its working directory and deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Shell-like rendering for logs and error messages
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{part}'")
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished (or killed) process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was terminated by a signal
    pub status: Option<i32>,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// Runs external processes. A timeout is reported through
/// [`ToolOutput::timed_out`], not as an error, so callers that expect the
/// deadline (a target that never exits) can still read its output.
pub trait ProcessRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for &mut R {
    fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation)
    }
}

impl<R: ProcessRunner + ?Sized> ProcessRunner for Box<R> {
    fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        (**self).run(invocation)
    }
}

/// Run and require a zero exit within the deadline
pub fn run_checked<R: ProcessRunner + ?Sized>(
    runner: &mut R,
    invocation: &Invocation,
) -> Result<ToolOutput, ToolError> {
    let output = runner.run(invocation)?;
    if output.timed_out {
        return Err(ToolError::TimedOut {
            command: invocation.command_line(),
            timeout: invocation.timeout,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    if output.status != Some(0) {
        return Err(ToolError::Failed {
            command: invocation.command_line(),
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// [`ProcessRunner`] backed by `duct`, polling the child until it exits or
/// its deadline passes
///
/// Output is captured through temporary files, not pipes, so a grandchild
/// that outlives the killed child cannot hold the run past its deadline.
#[derive(Debug, Clone)]
pub struct DuctRunner {
    poll_interval: Duration,
}

impl Default for DuctRunner {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
        }
    }
}

impl DuctRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

impl ProcessRunner for DuctRunner {
    fn run(&mut self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        let command = invocation.command_line();
        let spawn_error = |source| ToolError::Spawn {
            command: command.clone(),
            source,
        };

        let stdout = NamedTempFile::new().map_err(spawn_error)?;
        let stderr = NamedTempFile::new().map_err(spawn_error)?;
        let mut expression = duct::cmd(invocation.program.as_str(), &invocation.args)
            .stdin_null()
            .stdout_path(stdout.path())
            .stderr_path(stderr.path())
            .unchecked();
        if let Some(dir) = &invocation.cwd {
            expression = expression.dir(dir);
        }

        debug!(command = %command, timeout_secs = invocation.timeout.as_secs(), "running");
        let handle = expression.start().map_err(spawn_error)?;
        let deadline = Instant::now() + invocation.timeout;

        let (status, timed_out) = loop {
            if let Some(output) = handle.try_wait().map_err(spawn_error)? {
                break (output.status.code(), false);
            }
            if Instant::now() >= deadline {
                warn!(
                    command = %command,
                    timeout_secs = invocation.timeout.as_secs(),
                    "deadline reached, killing"
                );
                handle.kill().map_err(spawn_error)?;
                break (None, true);
            }
            thread::sleep(self.poll_interval);
        };

        Ok(ToolOutput {
            status,
            timed_out,
            stdout: read_captured(&stdout).map_err(spawn_error)?,
            stderr: read_captured(&stderr).map_err(spawn_error)?,
        })
    }
}

fn read_captured(file: &NamedTempFile) -> std::io::Result<String> {
    let bytes = fs::read(file.path())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
