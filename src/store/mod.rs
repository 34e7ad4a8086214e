// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster store abstraction.
//!
//! Reconcilers never talk to the Kubernetes API directly. They go through a
//! [`ClusterStore`], a key-value object store keyed by (kind, namespace, name) with
//! get/create/update/delete/list semantics and optimistic concurrency through
//! resource versions.
//!
//! Two implementations are provided:
//!
//! - [`KubeStore`] - backed by a `kube::Client`, used by the operator binary
//! - [`MemoryStore`] - an in-process store used by unit and scenario tests
//!
//! # Cascading deletion contract
//!
//! Every child object the operator creates carries an owner reference to its
//! `PravegaCluster`. Deleting an owner deletes everything it owns. The real API server
//! delegates this to the garbage collector; [`MemoryStore`] performs it inline.

pub mod kubernetes;
pub mod memory;

#[cfg(test)]
mod memory_tests;

pub use self::kubernetes::KubeStore;
pub use self::memory::MemoryStore;

use kube::core::NamespaceResourceScope;
use kube::Resource;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Objects that can be kept in a [`ClusterStore`].
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

impl<T> StoreObject for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Errors returned by a [`ClusterStore`].
#[derive(Debug, thiserror::Error)]
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

    /// Optimistic concurrency loss. The caller must re-fetch and retry.
    #[error("conflict writing {kind} {namespace}/{name}: the object has been modified")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Key-value object store with Kubernetes semantics.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch an object. A missing object is `Ok(None)`, not an error.
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str)
        -> Result<Option<K>, StoreError>;

    /// Create an object. Fails with [`StoreError::AlreadyExists`] if the name is taken.
    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Replace an object's metadata and spec.
    ///
    /// When the object carries a resource version that no longer matches, fails with
    /// [`StoreError::Conflict`]. The status of objects with a status subresource is
    /// left untouched.
    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Write only the status of an object.
    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError>;

    /// Delete an object. Fails with [`StoreError::NotFound`] if it does not exist.
    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// List objects of a kind in a namespace whose labels include all of `labels`.
    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError>;
}

/// Render a label map as an equality-based selector string (`a=b,c=d`).
#[must_use]
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
