//! Error types for command handlers

use axum::http::StatusCode;
use thiserror::Error;
use vyagent_common::AgentError;
use vyagent_config::ConfigError;

/// Errors a command handler can return.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The request body does not match the command type
    #[error("Failed to decode command: {0}")]
    Decode(#[source] serde_json::Error),

    /// Reading, mutating or committing configuration failed
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An external command or lookup failed
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

/// Result type alias for command handlers
pub type CommandResult<T> = std::result::Result<T, CommandError>;

impl CommandError {
    /// Creates an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// HTTP status reported for this error
    pub fn status(&self) -> StatusCode {
        match self {
            CommandError::Decode(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let decode = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert_eq!(CommandError::Decode(decode).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            CommandError::from(ConfigError::CommitFailed {
                exit_code: 1,
                output: "fail to commit".into()
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            CommandError::internal("boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_messages_pass_through() {
        let err = CommandError::from(AgentError::nic_not_found("cannot find any nic with the mac[aa]"));
        assert!(err.to_string().contains("cannot find any nic with the mac[aa]"));
    }
}
