//! Error types for agent infrastructure operations.
//!
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for agent infrastructure operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur while talking to the operating system.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The bootstrap file could not be read or parsed.
    #[error("Invalid bootstrap file {}: {message}", path.display())]
    Bootstrap {
        /// Path of the bootstrap file.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// No network interface matched the query.
    #[error("Network interface not found: {query}")]
    NicNotFound {
        /// What was searched for (MAC, IP or name).
        query: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl AgentError {
    /// Creates an I/O error bound to a path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a NIC-not-found error.
    pub fn nic_not_found(query: impl Into<String>) -> Self {
        Self::NicNotFound {
            query: query.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if the error came from an external command rather than
    /// from the agent itself.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            AgentError::ShellExec { .. } | AgentError::ShellCommandFailed { .. }
        )
    }
}
