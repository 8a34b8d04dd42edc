use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::Invocation;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors at the external-process boundary.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be started.
    #[error("could not start {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// Waiting on the process failed.
    #[error("could not wait for {program}: {source}")]
    Wait {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The process exceeded its wall-clock limit and was killed.
    #[error("{program} timed out after {} seconds", after.as_secs())]
    TimedOut {
        /// Program name.
        program: String,
        /// Limit that was exceeded.
        after: Duration,
    },

    /// The detached-process log file could not be created.
    #[error("could not create log file {}: {source}", path.display())]
    LogFile {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, absent when killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether the process exited successfully.
    pub success: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ToolOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output carrying `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Short failure description: trimmed stderr, or the exit status.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A detached process that can be checked without blocking.
pub trait ProcessHandle: Send + fmt::Debug {
    /// `Some(success)` once the process has exited, `None` while running.
    fn try_finished(&mut self) -> io::Result<Option<bool>>;
}

impl ProcessHandle for Child {
    fn try_finished(&mut self) -> io::Result<Option<bool>> {
        Ok(self.try_wait()?.map(|status| status.success()))
    }
}

/// Executes [`Invocation`]s.
pub trait ToolRunner: Send + Sync {
    /// Run to completion, capturing output and enforcing the timeout.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;

    /// Start detached with stdout and stderr appended to `log_path`.
    fn spawn(
        &self,
        invocation: &Invocation,
        log_path: &Path,
    ) -> Result<Box<dyn ProcessHandle>, ToolError>;
}

/// [`ToolRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

fn drain<R: Read>(source: Option<R>) -> Vec<u8> {
    let mut buffer = Vec::new();
    if let Some(mut source) = source {
        let _ = source.read_to_end(&mut buffer);
    }
    buffer
}

impl ToolRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        debug!(command = %invocation.display(), "running external tool");
        let program = invocation.program.clone();
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: program.clone(),
                source,
            })?;

        // A full pipe buffer blocks the child, so both pipes drain while we poll.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_reader = thread::spawn(move || drain(stdout));
        let stderr_reader = thread::spawn(move || drain(stderr));

        let started = Instant::now();
        let status = loop {
            let polled = child.try_wait().map_err(|source| ToolError::Wait {
                program: program.clone(),
                source,
            })?;
            if let Some(status) = polled {
                break status;
            }
            if started.elapsed() >= invocation.timeout {
                warn!(%program, timeout_secs = invocation.timeout.as_secs(), "killing timed-out tool");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ToolError::TimedOut {
                    program,
                    after: invocation.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        Ok(ToolOutput {
            exit_code: status.code(),
            success: status.success(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    fn spawn(
        &self,
        invocation: &Invocation,
        log_path: &Path,
    ) -> Result<Box<dyn ProcessHandle>, ToolError> {
        let log_error = |source| ToolError::LogFile {
            path: log_path.to_path_buf(),
            source,
        };
        let log = File::create(log_path).map_err(log_error)?;
        let log_err = log.try_clone().map_err(log_error)?;
        debug!(command = %invocation.display(), log = %log_path.display(), "spawning detached tool");
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .spawn()
            .map_err(|source| ToolError::Spawn {
                program: invocation.program.clone(),
                source,
            })?;
        Ok(Box::new(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr() {
        assert_eq!(ToolOutput::failed(2, "  bad input \n").diagnostic(), "bad input");
        assert_eq!(ToolOutput::failed(3, "").diagnostic(), "exited with status 3");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let inv = Invocation::new(super::super::ToolKind::Mafft);
        let inv = Invocation {
            program: "phylokit-no-such-program".to_string(),
            ..inv
        };
        assert!(matches!(SystemRunner.run(&inv), Err(ToolError::Spawn { .. })));
    }
}
