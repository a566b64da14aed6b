//! Logger setup errors

use thiserror::Error;

/// Errors raised while building the global subscriber
#[derive(Debug, Error)]
pub enum LogError {
    /// The level directive could not be parsed
    #[error("invalid filter directive: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("logger initialization failed: {0}")]
    Init(String),

    /// A configuration value was rejected
    #[error("invalid log configuration: {0}")]
    Config(String),
}

/// Result alias for logger setup
pub type LogResult<T> = Result<T, LogError>;
