//! Error types for the Hostwright reconciliation system.
//!
//! This module provides the error hierarchy for every stage of the resource
//! lifecycle: configuration, state management, the hosting API, and
//! reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Hostwright reconciliation system.
#[derive(Debug, Error)]
pub enum HostwrightError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Hosting API errors.
    #[error("Hosting API error: {0}")]
    Hosting(#[from] HostingError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A schema constraint was violated before any remote call was made.
    #[error("Configuration validation failed: {message}")]
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

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Kind of resource (disk, vm, etc.).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written to its backend.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
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

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Errors returned by the hosting service.
///
/// These are propagated verbatim; nothing in the reconciliation core retries
/// them.
#[derive(Debug, Error)]
pub enum HostingError {
    /// Authentication failed.
    #[error("Hosting authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The HTTP request itself failed.
    #[error("Hosting API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// The remote service rejected the operation.
    #[error("Hosting API fault {code} on {method}: {message}")]
    Fault {
        /// Remote method that failed.
        method: String,
        /// Fault code returned by the service.
        code: i64,
        /// Fault message returned by the service.
        message: String,
    },

    /// An operation referenced an object the service does not know.
    #[error("No {kind} with id {id}")]
    UnknownObject {
        /// Kind of object.
        kind: String,
        /// Identifier that was not found.
        id: String,
    },

    /// Network error.
    #[error("Network error communicating with the hosting API: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from the hosting API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A required lookup returned zero results.
    #[error("{kind} '{key}' not found")]
    NotFound {
        /// Kind of resource looked up.
        kind: String,
        /// Identifier or name used for the lookup.
        key: String,
    },

    /// A field that may only grow was asked to shrink.
    #[error("{address}: {field} may only grow (old {old}, new {new})")]
    MonotonicViolation {
        /// Address of the resource.
        address: String,
        /// Field that was asked to shrink.
        field: String,
        /// Previously applied value.
        old: u64,
        /// Requested value.
        new: u64,
    },

    /// A VM state value outside of running, halted and deleted.
    #[error("Unsupported VM state transition to '{value}'")]
    InvalidStateTransition {
        /// The rejected state value.
        value: String,
    },

    /// Some attribute groups of an update failed while others committed.
    #[error("Partial update of {address}: failed groups [{failed_groups}]: {message}")]
    PartialUpdate {
        /// Address of the resource.
        address: String,
        /// Comma separated list of failed groups.
        failed_groups: String,
        /// First failure message.
        message: String,
    },

    /// Detaching a sub-resource before deleting a VM failed.
    #[error("Failed to detach {attachment} from VM {vm}, VM was not deleted: {reason}")]
    DetachFailed {
        /// VM identifier.
        vm: String,
        /// Description of the attachment (e.g. `disk 42`).
        attachment: String,
        /// Underlying failure.
        reason: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Hostwright operations.
pub type Result<T> = std::result::Result<T, HostwrightError>;

impl HostwrightError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is a transport-level failure worth retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Hosting(HostingError::NetworkError { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns true if this error reports a missing resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Reconcile(ReconcileError::NotFound { .. })
                | Self::Hosting(HostingError::UnknownObject { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
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

impl HostingError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
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

    /// Creates an unknown-object error.
    #[must_use]
    pub fn unknown(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::UnknownObject {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl ReconcileError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            key: key.into(),
        }
    }
}
