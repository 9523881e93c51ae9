//! Error types for device sessions, command execution and run setup.
//!
//! Three layers of errors exist:
//!
//! - [`ConnectError`]: failures of an interactive SSH session (handshake,
//!   channel, prompt detection, timeouts).
//! - [`CommandError`]: the device accepted the session but rejected a command.
//!   This is the error the command dispatcher recovers from.
//! - [`VaneError`]: everything a caller of the crate can observe.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors raised by an interactive SSH session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The target mode cannot be reached from the current prompt state.
    #[error("unreachable mode {0}")]
    UnreachableMode(String),

    /// The SSH channel was disconnected while waiting for a prompt.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The SSH connection has been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// No prompt was seen after the shell was opened.
    #[error("initial prompt timeout: {0}")]
    InitTimeout(String),

    /// The prompt template could not be compiled.
    #[error("invalid prompt template: {0}")]
    InvalidTemplate(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}

impl ConnectError {
    /// Returns true for failures worth a reconnect-and-retry.
    ///
    /// Template and mode errors are configuration mistakes; reconnecting would
    /// fail the same way.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ConnectError::UnreachableMode(_) | ConnectError::InvalidTemplate(_)
        )
    }
}

/// One completed command of a batch that later failed.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub command: String,
    pub output: Value,
}

/// A device rejected a command of a batch.
///
/// The rendered message always names the failing command in single quotes,
/// `Error [1002]: CLI command 2 of 3 'show foo' failed: invalid command`,
/// which is what the dispatcher matches against.
#[derive(Error, Debug, Clone)]
#[error("Error [{code}]: {message}")]
pub struct CommandError {
    /// Remote error code (1002 for CLI rejections).
    pub code: i64,
    /// Human readable message as reported by the device.
    pub message: String,
    /// The command that failed.
    pub command: String,
    /// Commands of the same batch that completed before the failure.
    pub trace: Vec<TraceEntry>,
}

/// Error code eAPI uses for rejected CLI commands.
pub const CLI_ERROR_CODE: i64 = 1002;

impl CommandError {
    /// Builds an error in the eAPI message format for command `index` (0-based)
    /// of a batch of `total`.
    pub fn cli(
        command: &str,
        index: usize,
        total: usize,
        reason: &str,
        trace: Vec<TraceEntry>,
    ) -> Self {
        Self {
            code: CLI_ERROR_CODE,
            message: format!(
                "CLI command {} of {} '{}' failed: {}",
                index + 1,
                total,
                command,
                reason
            ),
            command: command.to_string(),
            trace,
        }
    }
}

/// A device whose worker task did not complete.
#[derive(Debug, Clone)]
pub struct DeviceFailure {
    pub device: String,
    pub reason: String,
}

impl std::fmt::Display for DeviceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.device, self.reason)
    }
}

/// Crate level error.
#[derive(Error, Debug)]
pub enum VaneError {
    /// A command was rejected by the device.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The SSH session to a device failed.
    #[error("session error on {host}: {source}")]
    Session {
        host: String,
        #[source]
        source: ConnectError,
    },

    /// HTTP transport to the eAPI endpoint failed.
    #[error("eapi transport error on {host}: {source}")]
    Http {
        host: String,
        #[source]
        source: reqwest::Error,
    },

    /// The eAPI endpoint answered with something that is not a JSON-RPC reply.
    #[error("unexpected eapi response from {host}: {message}")]
    Protocol { host: String, message: String },

    /// The connection was used before `set_up_conn`.
    #[error("connection to {0} is not set up")]
    NotConnected(String),

    /// A file could not be read or written.
    #[error("file error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A YAML file could not be parsed or rendered.
    #[error("yaml error on {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is syntactically valid but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The test case is not defined in the suite's parameter table.
    #[error("test case '{test_case}' not found in suite '{suite}'")]
    TestCaseNotFound { suite: String, test_case: String },

    /// A show command declared by the test case was not captured on the device.
    #[error("show command '{command}' was not captured on {dut} for {test_case}")]
    MissingShowCommand {
        test_case: String,
        dut: String,
        command: String,
    },

    /// One or more device worker tasks did not complete.
    #[error("{} device worker(s) failed: {}", .0.len(), join_failures(.0))]
    WorkerFailures(Vec<DeviceFailure>),
}

fn join_failures(failures: &[DeviceFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, VaneError>;
