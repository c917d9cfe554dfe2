//! Error types for the Stratus provisioning engine.
//!
//! This module provides the error hierarchy for the full plan/apply
//! lifecycle: manifest loading and validation, dependency analysis,
//! planning, state management, and the provisioning API.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Stratus provisioning engine.
#[derive(Debug, Error)]
pub enum StratusError {
    /// Resource model errors (manifest loading and validation).
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provisioning API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Resource model errors.
///
/// All of these are fatal and reported before any apply begins; a manifest
/// that fails validation never produces side effects.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The manifest file was not found.
    #[error("Manifest file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The manifest could not be parsed.
    #[error("Failed to parse manifest: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Two resources share the same identifier.
    #[error("Duplicate resource identifier: {id}")]
    DuplicateIdentifier {
        /// The duplicated identifier.
        id: String,
    },

    /// An attribute reference points at a resource or output that does
    /// not exist in the manifest.
    #[error("Unknown reference '{reference}' in resource '{resource}'")]
    UnknownReference {
        /// Resource whose attribute holds the dangling reference.
        resource: String,
        /// The reference expression as written.
        reference: String,
    },

    /// The reference relation over resource identifiers contains a cycle.
    #[error("Cyclic dependency detected: {cycle}")]
    CyclicDependency {
        /// The cycle, rendered as `a -> b -> ... -> a`.
        cycle: String,
    },

    /// A resource declaration failed validation.
    #[error("Manifest validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// A persisted record cannot be parsed.
    ///
    /// Fatal: corrupt state requires operator intervention and is never
    /// silently discarded.
    #[error("State is corrupt: {message}")]
    Corrupt {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// A record could not be written.
    #[error("Failed to persist state record '{id}': {message}")]
    WriteFailed {
        /// Resource identifier of the record.
        id: String,
        /// Description of the write failure.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Provisioning API errors.
///
/// These are recorded per resource during apply and never abort
/// independent branches of the plan.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed with a structured error.
    #[error("Provider API request failed: {status} - {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("Provider API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The remote resource does not exist.
    #[error("Remote resource not found: {remote_id}")]
    NotFound {
        /// Remote identifier of the missing resource.
        remote_id: String,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from provider API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The provider does not support the requested resource kind.
    #[error("Unsupported resource kind: {kind}")]
    UnsupportedKind {
        /// The unsupported kind.
        kind: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A reference could not be resolved against recorded outputs.
    #[error("Unresolved reference '{reference}' for resource '{resource}': {message}")]
    UnresolvedReference {
        /// Resource whose attribute holds the reference.
        resource: String,
        /// The reference expression.
        reference: String,
        /// Why resolution failed.
        message: String,
    },

    /// The plan's internal operation graph is inconsistent.
    #[error("Inconsistent operation ordering: {message}")]
    InconsistentOrdering {
        /// Description of the inconsistency.
        message: String,
    },

    /// A record required by a delete operation is missing its remote id.
    #[error("State record for '{resource}' has no remote identifier")]
    MissingRemoteId {
        /// Resource identifier.
        resource: String,
    },
}

/// Result type alias for Stratus operations.
pub type Result<T> = std::result::Result<T, StratusError>;

impl StratusError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is fatal to the whole run.
    ///
    /// Fatal errors abort before (or instead of) any apply; per-operation
    /// provider errors are isolated to their dependency chain instead.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Provider(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::RateLimited { .. } | ProviderError::NetworkError { .. }
            ) | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            Self::Provider(ProviderError::NetworkError { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ModelError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_errors_are_not_fatal() {
        let err = StratusError::Provider(ProviderError::api_error(500, "boom"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_model_errors_are_fatal() {
        let err = StratusError::Model(ModelError::DuplicateIdentifier {
            id: String::from("net"),
        });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_retry_delay() {
        let err = StratusError::Provider(ProviderError::RateLimited {
            retry_after_secs: 30,
        });
        assert!(err.is_retryable());
        assert_eq!(err.retry_delay_secs(), Some(30));

        let err = StratusError::Model(ModelError::MissingEnvVar {
            name: String::from("STRATUS_API_TOKEN"),
        });
        assert!(!err.is_retryable());
        assert_eq!(err.retry_delay_secs(), None);
    }
}
