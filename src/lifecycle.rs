//! Typestate pattern for the cluster lifecycle machine.
//!
//! This module encodes cluster statuses in the type system, making invalid
//! lifecycle transitions a compile-time error rather than a runtime error.
//!
//! # Example
//!
//! ```ignore
//! let requested = Lifecycle::<Requested>::request(data);
//! let creating = requested.begin_create();
//! let created = creating.created(provider_ref);
//! // created.created(..) would not compile - invalid transition
//! ```

use std::marker::PhantomData;

use crate::error::{ControlError, ControlResult};
use crate::types::{ClusterData, ClusterId, ClusterRecord, ClusterStatus, ProviderRef};

// =============================================================================
// Status marker types (zero-sized)
// =============================================================================

/// Marker trait for cluster lifecycle states.
pub trait LifecycleState: private::Sealed + Send + Sync {
    /// Get the persisted status representation.
    fn status() -> ClusterStatus;

    /// Get the status name for error messages.
    fn name() -> &'static str;
}

mod private {
    pub trait Sealed {}
}

/// Request accepted and recorded, provider not yet engaged.
#[derive(Debug, Clone, Copy)]
pub struct Requested;

/// Provider-side creation in progress.
#[derive(Debug, Clone, Copy)]
pub struct Creating;

/// Cluster is up and usable.
#[derive(Debug, Clone, Copy)]
pub struct Created;

/// Provider-side update in progress.
#[derive(Debug, Clone, Copy)]
pub struct Updating;

/// Provider-side teardown in progress.
#[derive(Debug, Clone, Copy)]
pub struct Deleting;

/// Cluster fully removed.
#[derive(Debug, Clone, Copy)]
pub struct Deleted;

/// An operation failed; the record keeps the failure message.
#[derive(Debug, Clone, Copy)]
pub struct Errored;

impl private::Sealed for Requested {}
impl private::Sealed for Creating {}
impl private::Sealed for Created {}
impl private::Sealed for Updating {}
impl private::Sealed for Deleting {}
impl private::Sealed for Deleted {}
impl private::Sealed for Errored {}

impl LifecycleState for Requested {
    fn status() -> ClusterStatus {
        ClusterStatus::Requested
    }
    fn name() -> &'static str {
        "requested"
    }
}

impl LifecycleState for Creating {
    fn status() -> ClusterStatus {
        ClusterStatus::Creating
    }
    fn name() -> &'static str {
        "creating"
    }
}

impl LifecycleState for Created {
    fn status() -> ClusterStatus {
        ClusterStatus::Created
    }
    fn name() -> &'static str {
        "created"
    }
}

impl LifecycleState for Updating {
    fn status() -> ClusterStatus {
        ClusterStatus::Updating
    }
    fn name() -> &'static str {
        "updating"
    }
}

impl LifecycleState for Deleting {
    fn status() -> ClusterStatus {
        ClusterStatus::Deleting
    }
    fn name() -> &'static str {
        "deleting"
    }
}

impl LifecycleState for Deleted {
    fn status() -> ClusterStatus {
        ClusterStatus::Deleted
    }
    fn name() -> &'static str {
        "deleted"
    }
}

impl LifecycleState for Errored {
    fn status() -> ClusterStatus {
        ClusterStatus::Error
    }
    fn name() -> &'static str {
        "error"
    }
}

// =============================================================================
// Lifecycle struct parameterised by status
// =============================================================================

/// A cluster in a specific lifecycle state.
///
/// The state parameter `S` determines which transitions are available.
/// Invalid transitions are caught at compile time.
#[derive(Debug)]
pub struct Lifecycle<S: LifecycleState> {
    /// The underlying cluster data.
    data: ClusterData,
    /// Zero-sized state marker.
    _state: PhantomData<S>,
}

impl<S: LifecycleState> Lifecycle<S> {
    /// Get a reference to the cluster data.
    #[must_use]
    pub const fn data(&self) -> &ClusterData {
        &self.data
    }

    /// Get the cluster ID.
    #[must_use]
    pub const fn id(&self) -> &ClusterId {
        &self.data.id
    }

    /// Get the current state as a persisted status.
    #[must_use]
    pub fn status(&self) -> ClusterStatus {
        S::status()
    }

    /// Get the status name.
    #[must_use]
    pub fn status_name(&self) -> &'static str {
        S::name()
    }

    /// Convert into the underlying data (consuming the lifecycle handle).
    #[must_use]
    pub fn into_data(self) -> ClusterData {
        self.data
    }

    /// Rebuild the persistable record for this state.
    #[must_use]
    pub fn to_record(&self) -> ClusterRecord {
        ClusterRecord {
            data: self.data.clone(),
            status: S::status(),
        }
    }

    /// Internal helper to transition to a new state.
    fn transition<T: LifecycleState>(self) -> Lifecycle<T> {
        Lifecycle {
            data: self.data,
            _state: PhantomData,
        }
    }

    /// Internal helper to transition with data modification.
    fn transition_with<T: LifecycleState>(
        mut self,
        f: impl FnOnce(&mut ClusterData),
    ) -> Lifecycle<T> {
        f(&mut self.data);
        self.data.updated_at = chrono::Utc::now();
        Lifecycle {
            data: self.data,
            _state: PhantomData,
        }
    }
}

// =============================================================================
// State transitions
// =============================================================================

impl Lifecycle<Requested> {
    /// Record a freshly accepted cluster request.
    #[must_use]
    pub const fn request(data: ClusterData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    /// Transition to the creating state.
    ///
    /// This should be called just before submitting the creation to the
    /// provider.
    #[must_use]
    pub fn begin_create(self) -> Lifecycle<Creating> {
        self.transition()
    }

    /// Transition to the deleting state, abandoning a request that never
    /// reached the provider.
    #[must_use]
    pub fn begin_delete(self) -> Lifecycle<Deleting> {
        self.transition()
    }
}

impl Lifecycle<Creating> {
    /// Transition to the created state.
    ///
    /// Called when the provider accepted the cluster; records the
    /// provider-native reference and clears any stale message.
    #[must_use]
    pub fn created(self, provider_ref: ProviderRef) -> Lifecycle<Created> {
        self.transition_with(|data| {
            data.provider_ref = Some(provider_ref);
            data.status_message = None;
        })
    }

    /// Transition to the error state.
    ///
    /// Use this when provider-side creation fails. The record stays behind
    /// with the failure message for the operator.
    #[must_use]
    pub fn fail(self, error: String) -> Lifecycle<Errored> {
        self.transition_with(|data| {
            data.status_message = Some(error);
        })
    }
}

impl Lifecycle<Created> {
    /// Transition to the updating state.
    #[must_use]
    pub fn begin_update(self) -> Lifecycle<Updating> {
        self.transition()
    }

    /// Transition to the deleting state.
    #[must_use]
    pub fn begin_delete(self) -> Lifecycle<Deleting> {
        self.transition()
    }
}

impl Lifecycle<Updating> {
    /// Transition back to the created state after a successful update.
    #[must_use]
    pub fn updated(self) -> Lifecycle<Created> {
        self.transition_with(|data| {
            data.status_message = None;
        })
    }

    /// Transition back to the created state, recording the configuration
    /// the update put in force.
    #[must_use]
    pub fn updated_with_config(self, config: crate::types::ClusterConfig) -> Lifecycle<Created> {
        self.transition_with(|data| {
            data.config = config;
            data.status_message = None;
        })
    }

    /// Transition to the error state when the update fails.
    #[must_use]
    pub fn fail(self, error: String) -> Lifecycle<Errored> {
        self.transition_with(|data| {
            data.status_message = Some(error);
        })
    }
}

impl Lifecycle<Deleting> {
    /// Transition to the deleted state.
    #[must_use]
    pub fn deleted(self) -> Lifecycle<Deleted> {
        self.transition_with(|data| {
            data.status_message = Some("cluster deleted".to_owned());
        })
    }

    /// Transition to the error state when teardown fails.
    #[must_use]
    pub fn fail(self, error: String) -> Lifecycle<Errored> {
        self.transition_with(|data| {
            data.status_message = Some(error);
        })
    }
}

impl Lifecycle<Errored> {
    /// Transition to the deleting state.
    ///
    /// The error status is terminal for automatic progress, but an operator
    /// can still delete the failed cluster.
    #[must_use]
    pub fn begin_delete(self) -> Lifecycle<Deleting> {
        self.transition()
    }
}

// =============================================================================
// Loading from persisted status
// =============================================================================

/// A type-erased cluster that can be in any lifecycle state.
///
/// This is used when loading from the store where the status is not known
/// at compile time.
#[derive(Debug)]
pub enum AnyLifecycle {
    /// Cluster in requested state.
    Requested(Lifecycle<Requested>),
    /// Cluster in creating state.
    Creating(Lifecycle<Creating>),
    /// Cluster in created state.
    Created(Lifecycle<Created>),
    /// Cluster in updating state.
    Updating(Lifecycle<Updating>),
    /// Cluster in deleting state.
    Deleting(Lifecycle<Deleting>),
    /// Cluster in deleted state.
    Deleted(Lifecycle<Deleted>),
    /// Cluster in error state.
    Errored(Lifecycle<Errored>),
}

impl AnyLifecycle {
    /// Create an `AnyLifecycle` from a stored record.
    #[must_use]
    pub fn from_record(record: ClusterRecord) -> Self {
        let ClusterRecord { data, status } = record;
        match status {
            ClusterStatus::Requested => Self::Requested(Lifecycle {
                data,
                _state: PhantomData,
            }),
            ClusterStatus::Creating => Self::Creating(Lifecycle {
                data,
                _state: PhantomData,
            }),
            ClusterStatus::Created => Self::Created(Lifecycle {
                data,
                _state: PhantomData,
            }),
            ClusterStatus::Updating => Self::Updating(Lifecycle {
                data,
                _state: PhantomData,
            }),
            ClusterStatus::Deleting => Self::Deleting(Lifecycle {
                data,
                _state: PhantomData,
            }),
            ClusterStatus::Deleted => Self::Deleted(Lifecycle {
                data,
                _state: PhantomData,
            }),
            ClusterStatus::Error => Self::Errored(Lifecycle {
                data,
                _state: PhantomData,
            }),
        }
    }

    /// Get a reference to the cluster data.
    #[must_use]
    pub const fn data(&self) -> &ClusterData {
        match self {
            Self::Requested(c) => c.data(),
            Self::Creating(c) => c.data(),
            Self::Created(c) => c.data(),
            Self::Updating(c) => c.data(),
            Self::Deleting(c) => c.data(),
            Self::Deleted(c) => c.data(),
            Self::Errored(c) => c.data(),
        }
    }

    /// Get the cluster ID.
    #[must_use]
    pub const fn id(&self) -> &ClusterId {
        match self {
            Self::Requested(c) => c.id(),
            Self::Creating(c) => c.id(),
            Self::Created(c) => c.id(),
            Self::Updating(c) => c.id(),
            Self::Deleting(c) => c.id(),
            Self::Deleted(c) => c.id(),
            Self::Errored(c) => c.id(),
        }
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> ClusterStatus {
        match self {
            Self::Requested(_) => ClusterStatus::Requested,
            Self::Creating(_) => ClusterStatus::Creating,
            Self::Created(_) => ClusterStatus::Created,
            Self::Updating(_) => ClusterStatus::Updating,
            Self::Deleting(_) => ClusterStatus::Deleting,
            Self::Deleted(_) => ClusterStatus::Deleted,
            Self::Errored(_) => ClusterStatus::Error,
        }
    }

    /// Try to extract a requested cluster.
    ///
    /// Returns an error if the cluster is not in the requested state.
    pub fn try_into_requested(self) -> ControlResult<Lifecycle<Requested>> {
        match self {
            Self::Requested(c) => Ok(c),
            other => Err(ControlError::InvalidStatusTransition {
                from: other.status().as_str(),
                to: "requested",
            }),
        }
    }

    /// Try to extract a created cluster.
    ///
    /// Returns an error if the cluster is not in the created state.
    pub fn try_into_created(self) -> ControlResult<Lifecycle<Created>> {
        match self {
            Self::Created(c) => Ok(c),
            other => Err(ControlError::InvalidStatusTransition {
                from: other.status().as_str(),
                to: "created",
            }),
        }
    }

    /// Begin deletion from whatever state the cluster is in.
    ///
    /// Requested, created and errored clusters can always start deleting.
    /// Clusters mid-create or mid-update need `force`; a cluster already
    /// deleting or deleted cannot start again.
    pub fn begin_delete(self, force: bool) -> ControlResult<Lifecycle<Deleting>> {
        match self {
            Self::Requested(c) => Ok(c.begin_delete()),
            Self::Created(c) => Ok(c.begin_delete()),
            Self::Errored(c) => Ok(c.begin_delete()),
            Self::Creating(c) if force => Ok(c.transition()),
            Self::Updating(c) if force => Ok(c.transition()),
            other @ (Self::Creating(_) | Self::Updating(_)) => {
                Err(ControlError::ClusterNotReady {
                    status: other.status(),
                })
            }
            other => Err(ControlError::InvalidStatusTransition {
                from: other.status().as_str(),
                to: "deleting",
            }),
        }
    }

    /// Check if the cluster is in a terminal state (no automatic
    /// transitions remain).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted(_) | Self::Errored(_))
    }
}
