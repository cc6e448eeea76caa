//! Host process execution for the command-line connectors.
//!
//! Both the local and the remote-shell connectors issue `mm*` administration
//! commands through a [`CommandRunner`], which lets tests swap in a scripted
//! runner without touching the connector code.

use std::ffi::OsString;
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::debug;

/// Exit code and captured streams of a finished administration command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
    /// Standard output decoded lossily as UTF-8.
    pub stdout: String,
    /// Standard error decoded lossily as UTF-8.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Exit status rendered for [`crate::ConnectorError::CommandFailure`].
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// The operating system refused to start a command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to spawn {program}: {message}")]
pub struct SpawnError {
    /// Program name or path passed to the runner.
    pub program: String,
    /// Rendered OS error.
    pub message: String,
}

impl SpawnError {
    /// Builds a spawn error for `program` with a rendered cause.
    #[must_use]
    pub fn new(program: &str, message: impl Into<String>) -> Self {
        Self {
            program: program.to_owned(),
            message: message.into(),
        }
    }
}

/// Executes a program to completion and captures its output.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError`] when the process could not be started. A
    /// non-zero exit is not an error at this level.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError>;
}

/// Runs commands on the local host.
///
/// Commands run with the `C` locale so the colon-delimited reports of the
/// `mm*` tools keep a stable layout, and with stdin detached so a prompting
/// command cannot hang the engine.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        debug!(program, ?args, "spawning administration command");
        Command::new(program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .output()
            .map(CommandOutput::from)
            .map_err(|err| SpawnError::new(program, err.to_string()))
    }
}
