//! Error types for instance pooling
use thiserror::Error;

use crate::key::{GroupId, ResourceKey};

/// Result type for pooling operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pooling operations.
///
/// Failures inside the engine stay local: acquisition paths log the error and
/// degrade to `None`, release paths return it to the caller after logging.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation needed a template before it was resolved
    #[error("Template for '{key}' is not resolved")]
    Unresolved {
        /// The resource key
        key: ResourceKey,
    },

    /// A resource key was empty or otherwise unusable
    #[error("Invalid resource key: {reason}")]
    InvalidKey {
        /// Why the key was rejected
        reason: String,
    },

    /// An entry was released into a pool that already holds it
    #[error("Entry {entry} of '{key}' released twice")]
    DoubleRelease {
        /// The resource key
        key: ResourceKey,
        /// The entry identifier
        entry: String,
    },

    /// An instance was released to a pool or registry that does not own it
    #[error("Instance of '{key}' in group '{group}' has no matching pool")]
    ForeignInstance {
        /// The key recorded on the instance
        key: ResourceKey,
        /// The group recorded on the instance
        group: GroupId,
    },

    /// The asset loader failed to resolve a template
    #[error("Failed to resolve template '{key}': {reason}")]
    Resolution {
        /// The resource key
        key: ResourceKey,
        /// The failure reason
        reason: String,
    },

    /// Instance creation failed
    #[error("Failed to create instance of '{key}': {reason}")]
    Creation {
        /// The resource key
        key: ResourceKey,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The asset loader reported an error
    #[error("Asset loader error for '{key}': {reason}")]
    Loader {
        /// The resource key
        key: ResourceKey,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No adapter is registered for the requested view
    #[error("No adapter for capability '{capability}' on '{key}'")]
    UnsupportedCapability {
        /// The resource key
        key: ResourceKey,
        /// Type name of the requested view
        capability: &'static str,
    },

    /// A reference count would have gone below zero
    #[error("Reference count underflow for '{key}'")]
    ReferenceUnderflow {
        /// The resource key
        key: ResourceKey,
    },

    /// Configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The pool has been shut down
    #[error("Pool for '{key}' is closed")]
    Closed {
        /// The resource key
        key: ResourceKey,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid-key error
    pub fn invalid_key<S: Into<String>>(reason: S) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Create a loader error without an underlying source
    pub fn loader<S: Into<String>>(key: &ResourceKey, reason: S) -> Self {
        Self::Loader {
            key: key.clone(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Check if retrying the same request may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unresolved { .. }
                | Self::Resolution { .. }
                | Self::Creation { .. }
                | Self::Loader { .. }
        )
    }

    /// Get the resource key associated with this error (if any)
    #[must_use]
    pub fn resource_key(&self) -> Option<&ResourceKey> {
        match self {
            Self::InvalidKey { .. } | Self::Configuration { .. } => None,
            Self::Unresolved { key }
            | Self::DoubleRelease { key, .. }
            | Self::ForeignInstance { key, .. }
            | Self::Resolution { key, .. }
            | Self::Creation { key, .. }
            | Self::Loader { key, .. }
            | Self::UnsupportedCapability { key, .. }
            | Self::ReferenceUnderflow { key }
            | Self::Closed { key } => Some(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_failures_are_retryable() {
        let key = ResourceKey::new("fx.spark").unwrap();
        assert!(
            Error::Resolution {
                key: key.clone(),
                reason: "offline".into()
            }
            .is_retryable()
        );
        assert!(Error::loader(&key, "timeout").is_retryable());
        assert!(!Error::ReferenceUnderflow { key }.is_retryable());
        assert!(!Error::invalid_key("empty").is_retryable());
    }

    #[test]
    fn resource_key_is_exposed() {
        let key = ResourceKey::new("ui.panel").unwrap();
        let err = Error::Closed { key: key.clone() };
        assert_eq!(err.resource_key(), Some(&key));
        assert!(Error::configuration("bad").resource_key().is_none());
    }

    #[test]
    fn display_includes_key_and_group() {
        let err = Error::ForeignInstance {
            key: ResourceKey::new("fx.smoke").unwrap(),
            group: GroupId::new("menu"),
        };
        assert_eq!(
            err.to_string(),
            "Instance of 'fx.smoke' in group 'menu' has no matching pool"
        );
    }
}
