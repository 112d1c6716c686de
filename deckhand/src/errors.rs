//! Error types for deckhand

use thiserror::Error;

/// Main error type for deckhand
#[derive(Error, Debug)]
pub enum DeckhandError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// A dispatched command exited non-zero or its shell session failed.
    ///
    /// Whatever the command printed has already been captured (and, for deploy
    /// commands, appended to the deployment log), so callers must not dump it again.
    #[error("Command failed with exit code {code:?}: {stderr}")]
    Exec {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("Error creating the deployment: {0}")]
    CreateDeployment(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Deployment error: {0}")]
    DeployError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeckhandError {
    /// Whether this error came from a failed command execution
    pub fn is_exec(&self) -> bool {
        matches!(self, DeckhandError::Exec { .. })
    }
}
