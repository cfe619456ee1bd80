//! # Object Store
//!
//! Namespace-scoped object storage consumed by the reconcilers.
//!
//! The reconcilers are generic over [`ObjectStore`] so that they can run
//! against the cluster ([`KubeStore`]) or fully in-process ([`MemoryStore`]).
//! Writes rely on the store's optimistic concurrency; a rejected stale write
//! surfaces as [`StoreError::Conflict`] and the next reconcile retries.

mod cluster;
mod memory;

pub use cluster::KubeStore;
pub use memory::{MemoryStore, Mutation, MutationOp};

use kube::core::NamespaceResourceScope;
use kube::Resource;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

/// Bounds every object kept in the store satisfies
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("conflicting write to {0}")]
    Conflict(String),
    #[error("object has no {0}")]
    MissingMetadata(&'static str),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("api error: {0}")]
    Api(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Generic namespaced object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one object, `None` when it does not exist
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// List objects in a namespace matching a `k=v,...` label selector
    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<K>, StoreError>;

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an object; stale resource versions are rejected
    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Persist the status sub-object of `obj`
    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError>;

    /// Whether the API serving `K` is installed in the cluster
    async fn kind_installed<K: StoreObject>(&self) -> Result<bool, StoreError>;

    /// Stable identifier of the cluster (uid of `kube-system`)
    async fn cluster_id(&self) -> Result<String, StoreError>;
}

pub(crate) fn object_key<K: StoreObject>(obj: &K) -> Result<(String, String), StoreError> {
    let meta = obj.meta();
    let namespace = meta
        .namespace
        .clone()
        .ok_or(StoreError::MissingMetadata("namespace"))?;
    let name = meta.name.clone().ok_or(StoreError::MissingMetadata("name"))?;
    Ok((namespace, name))
}
