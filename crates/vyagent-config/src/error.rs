//! Error types for configuration-tree operations.

use std::path::PathBuf;
use thiserror::Error;
use vyagent_common::AgentError;

/// Result type alias for configuration-tree operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while parsing, mutating or committing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration text is not well formed.
    #[error("Configuration parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Error message.
        message: String,
    },

    /// A configuration path could not be constructed.
    #[error("Invalid configuration path '{path}': {reason}")]
    InvalidPath {
        /// The offending text.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// No free firewall rule number is left in a ruleset.
    #[error("No free firewall rule number in ruleset {ruleset} (floor {floor}, max {max})")]
    RuleNumbersExhausted {
        /// Ruleset name, e.g. `eth0.local`.
        ruleset: String,
        /// Lowest number considered.
        floor: u32,
        /// Highest number considered.
        max: u32,
    },

    /// The commit script ran but the commit failed.
    #[error("Configuration commit failed (exit code {exit_code}): {output}")]
    CommitFailed {
        /// Exit status of the script.
        exit_code: i32,
        /// Combined output of the script.
        output: String,
    },

    /// Staging the commit script on disk failed.
    #[error("Unable to stage commit script {}: {message}", path.display())]
    Staging {
        /// The script path.
        path: PathBuf,
        /// Error message.
        message: String,
    },

    /// An external command failed.
    #[error(transparent)]
    Agent(#[from] AgentError),
}

impl ConfigError {
    /// Creates a parse error.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a staging error.
    pub fn staging(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        Self::Staging {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
