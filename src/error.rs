//! Error types for meridian-control.

use crate::types::{CloudProvider, ClusterStatus};

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors that can occur in the cluster lifecycle engine.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request or name validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// A live cluster already holds the requested name.
    #[error("cluster name already in use: {name}")]
    DuplicateName {
        /// The contested cluster name.
        name: String,
    },

    /// Cluster record not found.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// Profile not found for the given cloud and name.
    #[error("profile not found: {cloud}/{name}")]
    ProfileNotFound {
        /// Cloud the profile was looked up under.
        cloud: CloudProvider,
        /// Profile name.
        name: String,
    },

    /// Update request matches the running cluster exactly.
    #[error("update request matches the running cluster, nothing to change")]
    NoChangeRequested,

    /// Cloud provider string not recognised.
    #[error("unsupported cloud provider: {0}")]
    UnsupportedCloud(String),

    /// Operation requires a cluster in the created state.
    #[error("cluster is not ready: current status is {status}")]
    ClusterNotReady {
        /// Status the cluster was found in.
        status: ClusterStatus,
    },

    /// Invalid lifecycle transition attempted.
    #[error("invalid status transition: cannot transition from {from} to {to}")]
    InvalidStatusTransition {
        /// Current status.
        from: &'static str,
        /// Attempted target status.
        to: &'static str,
    },

    /// Stored record could not be decoded into a usable cluster.
    #[error("malformed cluster record: {0}")]
    MalformedRecord(String),

    /// Cloud provider API failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Cloud provider call exceeded the configured deadline.
    #[error("provider call timed out after {seconds}s")]
    ProviderTimeout {
        /// Deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// A post-provisioning pipeline stage failed.
    #[error("pipeline stage {stage} failed: {detail}")]
    PipelineStage {
        /// Name of the failed stage.
        stage: &'static str,
        /// Failure detail.
        detail: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a duplicate-name error.
    #[must_use]
    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    /// Create a provider error.
    #[must_use]
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    /// Create a malformed-record error.
    #[must_use]
    pub fn malformed_record(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialisation error.
    #[must_use]
    pub fn serialisation(msg: impl Into<String>) -> Self {
        Self::Serialisation(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a duplicate-name rejection.
    #[must_use]
    pub const fn is_duplicate_name(&self) -> bool {
        matches!(self, Self::DuplicateName { .. })
    }

    /// Whether this error means a record was absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ClusterNotFound(_) | Self::ProfileNotFound { .. }
        )
    }
}
