//! Shell Command Execution
//!
//! Runs resolved `system_command` text through `bash -c`, either waiting for
//! it and capturing its output, or detaching it with output redirected to a
//! log file.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, warn};

use super::ActionError;

/// A fully resolved command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRequest {
    pub command: String,
    pub working_dir: Option<PathBuf>,
    /// When set, the command runs detached with output appended to this file
    pub background_log: Option<PathBuf>,
}

impl ShellRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_dir: None,
            background_log: None,
        }
    }
}

/// Captured result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` for background launches or signal termination
    pub code: Option<i32>,
}

impl ShellOutput {
    /// Returns true unless the command reported a non-zero exit code.
    pub fn success(&self) -> bool {
        self.code.map_or(true, |code| code == 0)
    }
}

/// Executes shell commands on behalf of `system_command` steps.
pub trait ShellRunner: Send + Sync {
    fn run(&self, request: &ShellRequest) -> Result<ShellOutput, ActionError>;
}

/// Runs commands with the system `bash`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BashRunner;

impl BashRunner {
    fn command(request: &ShellRequest) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(&request.command);

        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
            debug!("Executing in directory: {}", dir.display());
        }
        cmd
    }

    fn spawn_detached(request: &ShellRequest, log_path: &Path) -> Result<ShellOutput, ActionError> {
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = File::options().create(true).append(true).open(log_path)?;

        let mut child = Self::command(request)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;

        debug!(
            "Background command started (pid {}), output in {}",
            child.id(),
            log_path.display()
        );

        // Reap the child when it exits so it does not linger as a zombie
        thread::spawn(move || {
            if let Err(e) = child.wait() {
                warn!("Failed to wait for background command: {}", e);
            }
        });

        Ok(ShellOutput::default())
    }
}

impl ShellRunner for BashRunner {
    fn run(&self, request: &ShellRequest) -> Result<ShellOutput, ActionError> {
        if let Some(log_path) = &request.background_log {
            return Self::spawn_detached(request, log_path);
        }

        let output = Self::command(request).stdin(Stdio::null()).output()?;

        Ok(ShellOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}
