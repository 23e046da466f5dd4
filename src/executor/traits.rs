//! Execution seams
//!
//! The engine reaches the outside world only through the traits in this
//! module: [`CommandRunner`] to run processes, [`SecretResolver`] to turn
//! secret names into values and [`Notifier`] to deliver the final report.

use super::cancel::CancellationToken;
use crate::pipeline::{NotificationPayload, SecretRef, SecretShape};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;

/// One external command to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program to execute, looked up on `PATH`
    pub program: String,

    /// Arguments, passed verbatim
    pub args: Vec<String>,

    /// Variables added to the inherited environment
    pub env: HashMap<String, String>,

    /// Working directory (inherited when `None`)
    pub cwd: Option<PathBuf>,

    /// Hard deadline for the command
    pub timeout: Duration,
}

impl Invocation {
    /// Creates an invocation with a 60 second deadline
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: HashMap::new(),
            cwd: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Builds an invocation from a rendered argv; `None` when empty
    #[must_use]
    pub fn from_argv(mut argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        let program = argv.remove(0);
        Some(Self::new(program, argv))
    }

    /// Adds environment variables
    #[must_use]
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Sets the working directory
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the deadline
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Result of running a command to completion, timeout or cancellation
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOutput {
    /// Exit code; `128 + signal` when the process was terminated
    pub exit_code: i32,

    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,

    /// The command was terminated at its deadline
    pub timed_out: bool,

    /// The command was terminated by run cancellation
    pub cancelled: bool,

    /// Time spent running
    pub duration: Duration,
}

impl RunOutput {
    /// Returns true if command exited 0 on its own
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }
}

/// Environment-level inability to run a command
///
/// A non-zero exit is never a fault; it is reported in [`RunOutput`].
#[derive(Error, Debug)]
pub enum RunnerFault {
    /// The process could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The process could not be waited on or terminated
    #[error("failed to supervise '{program}': {source}")]
    Supervise {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs one command, never exceeding `invocation.timeout`
    ///
    /// Cancelling `cancel` terminates the process.
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutput, RunnerFault>;
}

/// A secret value, alive for one stage
///
/// Files are removed from disk when the value is dropped.
pub enum ResolvedSecret {
    /// Username and password pair
    UsernamePassword {
        /// Username.
        username: String,
        /// Password.
        password: String,
    },

    /// Transient file holding the secret contents
    File(NamedTempFile),

    /// Opaque string
    Text(String),
}

impl ResolvedSecret {
    /// Shape of this value
    #[must_use]
    pub fn shape(&self) -> SecretShape {
        match self {
            Self::UsernamePassword { .. } => SecretShape::UsernamePassword,
            Self::File(_) => SecretShape::File,
            Self::Text(_) => SecretShape::Text,
        }
    }

    /// Path of a materialized file
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(file) => Some(file.path()),
            _ => None,
        }
    }
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UsernamePassword { username, .. } => f
                .debug_struct("UsernamePassword")
                .field("username", username)
                .field("password", &"****")
                .finish(),
            Self::File(file) => f.debug_tuple("File").field(&file.path()).finish(),
            Self::Text(_) => f.debug_tuple("Text").field(&"****").finish(),
        }
    }
}

/// Failure to resolve a secret reference
#[derive(Error, Debug)]
pub enum SecretError {
    /// No secret with this name exists
    #[error("secret '{name}' not found")]
    NotFound {
        /// Secret name.
        name: String,
    },

    /// The stored value has another shape than requested
    #[error("secret '{name}' is {actual}, expected {expected}")]
    ShapeMismatch {
        /// Secret name.
        name: String,
        /// Requested shape.
        expected: SecretShape,
        /// Stored shape.
        actual: SecretShape,
    },

    /// A file secret could not be written to disk
    #[error("failed to materialize secret '{name}': {source}")]
    Materialize {
        /// Secret name.
        name: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Turns secret references into values
pub trait SecretResolver: Send + Sync {
    /// Resolves one reference
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::NotFound`] for unknown names and
    /// [`SecretError::ShapeMismatch`] when the stored shape differs from
    /// `reference.shape`.
    fn resolve(&self, reference: &SecretRef) -> Result<ResolvedSecret, SecretError>;
}

/// Failure to deliver a report
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The channel could not be reached or failed the request
    #[error("notification channel error: {0}")]
    Channel(String),

    /// The channel answered with a non-success status
    #[error("notification rejected with HTTP status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The channel did not answer in time
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers the final report of a run
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends `payload` through the channel
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    async fn notify(&self, payload: &NotificationPayload) -> Result<(), NotifyError>;
}
