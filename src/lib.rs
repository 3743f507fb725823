//! Meridian Control
//!
//! This crate provides the lifecycle engine for managed Kubernetes clusters
//! across Amazon EKS, Azure AKS and Google GKE. It owns the stored cluster
//! records, drives provider-side operations, and keeps the surrounding
//! plumbing (credentials, monitoring targets, installed packages) in step
//! with the fleet.
//!
//! # Architecture
//!
//! The engine is responsible for:
//!
//! - **Lifecycle orchestration**: Validating requests, resolving profiles
//!   and driving provider-side create, update and delete operations
//! - **State management**: Persisting one record per cluster and enforcing
//!   legal status transitions at compile time
//! - **Provider variants**: One capability set
//!   ([`cluster::ProviderCluster`]) implemented per supported cloud, behind
//!   a provider-agnostic facade
//! - **Post-provisioning**: Priming credentials, monitoring targets and the
//!   package set on every cluster the engine brings up
//!
//! # State Machine
//!
//! Clusters follow a strict state machine enforced at compile time using
//! the typestate pattern:
//!
//! ```text
//! Requested ──▶ Creating ──▶ Created ◀──▶ Updating
//!                  │            │
//!                  ▼            ▼
//!                Error ──▶  Deleting ──▶ Deleted
//! ```
//!
//! Requested clusters can begin deleting too, and a cluster mid-create or
//! mid-update is only deletable when forced. Invalid transitions are caught
//! at compile time, not runtime.
//!
//! # Example
//!
//! ```ignore
//! use meridian_control::{
//!     Lifecycle, Requested,
//!     types::ClusterData,
//! };
//!
//! // Record an accepted request
//! let data = ClusterData::new("web_prod", config);
//! let requested = Lifecycle::<Requested>::request(data);
//!
//! // State transitions are type-safe
//! let creating = requested.begin_create();
//! let created = creating.created(provider_ref);
//!
//! // This would not compile:
//! // let again = created.created(provider_ref); // Error!
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod monitoring;
pub mod packages;
pub mod pipeline;
pub mod profiles;
pub mod store;
pub mod tasks;
pub mod types;
pub mod workload;

// Re-export commonly used types at the crate root
pub use cluster::{CloudClients, CommonCluster, MockCloud, ProviderCluster, ProviderHealth};
pub use config::ControlConfig;
pub use error::{ControlError, ControlResult};
pub use lifecycle::{
    AnyLifecycle, Created, Creating, Deleted, Deleting, Errored, Lifecycle, LifecycleState,
    Requested, Updating,
};
pub use manager::{ClusterManager, CredentialCache};
pub use profiles::{DefaultProfile, ProfilePayload};
pub use store::{ClusterFilter, ClusterStore, MemoryStore, PostgresStore, ProfileStore};
pub use tasks::{TaskId, TaskRecord, TaskRunner, TaskStatus};
pub use types::{
    CloudProvider, ClusterConfig, ClusterData, ClusterId, ClusterRecord, ClusterStatus,
    CreateClusterRequest, DeleteReceipt, StatusSnapshot, UpdateClusterRequest,
};
