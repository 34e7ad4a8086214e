// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the cluster reconciler.
//!
//! The controller hands every reconcile an `Arc<Context>` that contains:
//! - the [`ClusterStore`] all reads and writes go through
//! - the [`MetadataCleanup`] collaborator used when a cluster is deleted
//! - the [`OperatorConfig`] shaping defaults and reconcile policy
//!
//! The operator binary instantiates it as [`OperatorContext`]. Tests build it over a
//! `MemoryStore` and a fake cleanup.

use crate::config::OperatorConfig;
use crate::metadata::{MetadataCleanup, ZookeeperMetadataCleanup};
use crate::store::{ClusterStore, KubeStore};
use kube::Client;

/// Shared context passed to the reconciler.
pub struct Context<S, M> {
    /// Object store for the cluster and its children
    pub store: S,

    /// External metadata cleanup
    pub cleanup: M,

    /// Operator-wide configuration
    pub config: OperatorConfig,
}

impl<S: ClusterStore, M: MetadataCleanup> Context<S, M> {
    #[must_use]
    pub fn new(store: S, cleanup: M, config: OperatorConfig) -> Self {
        Self {
            store,
            cleanup,
            config,
        }
    }
}

/// Context used by the operator binary.
pub type OperatorContext = Context<KubeStore, ZookeeperMetadataCleanup>;

impl OperatorContext {
    /// Build the production context from a Kubernetes client.
    #[must_use]
    pub fn from_client(client: Client, config: OperatorConfig) -> Self {
        Self::new(
            KubeStore::new(client.clone()),
            ZookeeperMetadataCleanup::new(client),
            config,
        )
    }
}
