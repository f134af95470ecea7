//! Error types for the Gatekeeper engine.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Layered configuration could not be built or deserialized
    #[error("Configuration load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// A policy failed validation and was rejected at write time
    #[error("Invalid policy '{name}': {reason}")]
    InvalidPolicy { name: String, reason: String },

    /// An endpoint or caller pattern could not be compiled
    #[error("Malformed pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// The counting or violation backend did not answer
    #[error("Backing store unavailable: {0}")]
    BackingStoreUnavailable(String),

    /// A notification channel failed to deliver an alert
    #[error("Notification to '{channel}' failed: {reason}")]
    Notification { channel: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatekeeperError {
    pub fn invalid_policy(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    pub fn notification(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Notification {
            channel: channel.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
