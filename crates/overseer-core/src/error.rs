//! Error types for overseer operations.
//!
//! Every failure names the service (or command, or file) it concerns so an
//! operator can act on the message without reading logs.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for overseer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for overseer operations.
#[derive(Debug, Error)]
pub enum Error {
    // Convergence errors
    #[error("Supervisor service {service} cannot be {verb} because it does not exist")]
    NotFound { service: String, verb: &'static str },

    #[error("Supervisor service {service} was unable to be {verb}: {detail}")]
    ControlCommandFailed {
        service: String,
        verb: &'static str,
        detail: String,
    },

    #[error("service {service} not in state {state} after {tries} tries")]
    StateTimeout {
        service: String,
        state: String,
        tries: u32,
    },

    // Invocation errors
    #[error("failed to run '{command}': {reason}")]
    InvocationFailed { command: String, reason: String },

    #[error("'{command}' did not finish within {timeout_secs}s")]
    InvocationTimeout { command: String, timeout_secs: u64 },

    // Specification and configuration errors
    #[error("invalid service '{service}': {reason}")]
    InvalidSpec { service: String, reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("failed to parse '{path}': {reason}")]
    ParseFailed { path: PathBuf, reason: String },

    // File errors
    #[error("failed to write file '{path}': {reason}")]
    FileWriteFailed { path: PathBuf, reason: String },

    #[error("failed to remove file '{path}': {reason}")]
    FileRemoveFailed { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Machine-readable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ControlCommandFailed,
    StateTimeout,
    InvocationError,
    InvalidSpec,
    Config,
    Io,
}

impl ErrorKind {
    /// Stable `SCREAMING_SNAKE_CASE` code for JSON output.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::ControlCommandFailed => "CONTROL_COMMAND_FAILED",
            Self::StateTimeout => "STATE_TIMEOUT",
            Self::InvocationError => "INVOCATION_ERROR",
            Self::InvalidSpec => "INVALID_SPEC",
            Self::Config => "CONFIG_ERROR",
            Self::Io => "IO_ERROR",
        }
    }
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ControlCommandFailed { .. } => ErrorKind::ControlCommandFailed,
            Self::StateTimeout { .. } => ErrorKind::StateTimeout,
            Self::InvocationFailed { .. } | Self::InvocationTimeout { .. } => {
                ErrorKind::InvocationError
            }
            Self::InvalidSpec { .. } => ErrorKind::InvalidSpec,
            Self::InvalidConfig { .. } | Self::ParseFailed { .. } => ErrorKind::Config,
            Self::FileWriteFailed { .. } | Self::FileRemoveFailed { .. } | Self::Io(_) => {
                ErrorKind::Io
            }
        }
    }

    /// Shorthand for `self.kind().code()`.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Create a not-found error for the given verb ("started", "stopped", ...).
    pub fn not_found(service: impl Into<String>, verb: &'static str) -> Self {
        Self::NotFound {
            service: service.into(),
            verb,
        }
    }

    /// Create a control command failure.
    pub fn control_failed(
        service: impl Into<String>,
        verb: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::ControlCommandFailed {
            service: service.into(),
            verb,
            detail: detail.into(),
        }
    }

    /// Create a poll-budget exhaustion error.
    pub fn state_timeout(service: impl Into<String>, state: impl Into<String>, tries: u32) -> Self {
        Self::StateTimeout {
            service: service.into(),
            state: state.into(),
            tries,
        }
    }

    /// Create an invocation failure.
    pub fn invocation_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvocationFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid specification error.
    pub fn invalid_spec(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Create a parse error.
    pub fn parse_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ParseFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a file write error.
    pub fn file_write_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a file removal error.
    pub fn file_remove_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::FileRemoveFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
