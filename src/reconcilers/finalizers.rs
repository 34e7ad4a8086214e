// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management and deletion handling for `PravegaCluster` resources.
//!
//! A finalizer is added to every cluster (unless disabled in the operator
//! configuration) so that deleting the resource gives the operator a chance to
//! remove the cluster's coordination metadata before the object disappears.
//!
//! # Deletion sequence
//!
//! 1. Delete the controller deployment and the segment store and bookie statefulsets
//! 2. Requeue until every cluster pod has terminated
//! 3. Delete the cluster's external metadata through [`MetadataCleanup`]
//! 4. Remove the finalizer so garbage collection removes the remaining children
//!
//! Cleanup failures are retried on later reconciles and counted in
//! `status.cleanupAttempts`. Once the configured number of attempts is used up, the
//! finalizer is removed anyway and the abandoned cleanup is logged and counted, so a
//! broken metadata store can never block a deletion forever.
//!
//! # Example
//!
//! ```rust,ignore
//! use pravega_operator::reconcilers::finalizers::{ensure_finalizer, handle_deletion};
//! use pravega_operator::labels::FINALIZER_PRAVEGA_CLUSTER;
//!
//! if cluster.metadata.deletion_timestamp.is_some() {
//!     return handle_deletion(&ctx, &cluster).await;
//! }
//! let cluster = ensure_finalizer(&ctx.store, &cluster, FINALIZER_PRAVEGA_CLUSTER).await?;
//! ```

use crate::context::Context;
use crate::crd::PravegaCluster;
use crate::labels::{cluster_labels, FINALIZER_PRAVEGA_CLUSTER};
use crate::metadata::{ClusterRef, MetadataCleanup};
use crate::metrics;
use crate::reconcilers::resources::{delete_if_exists, update_object};
use crate::reconcilers::workloads::segment_store_statefulsets;
use crate::store::{ClusterStore, StoreObject};
use anyhow::{Context as _, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, error, info};

/// Where a deletion stands after one reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionProgress {
    /// Cluster pods are still terminating; check again after the termination poll.
    WaitingForPods { remaining: usize },

    /// The finalizer is gone (or was never there); nothing left to do.
    Finalized,
}

fn has_finalizer<K: StoreObject>(resource: &K, finalizer: &str) -> bool {
    resource.finalizers().iter().any(|f| f == finalizer)
}

/// Add a finalizer to a resource if not already present.
///
/// Returns the resource as stored afterwards, which carries the new resource
/// version when the finalizer had to be added.
///
/// # Errors
///
/// Returns an error if the store rejects the update.
pub async fn ensure_finalizer<S, K>(store: &S, resource: &K, finalizer: &str) -> Result<K>
where
    S: ClusterStore,
    K: StoreObject,
{
    if has_finalizer(resource, finalizer) {
        return Ok(resource.clone());
    }

    info!(
        "Adding finalizer {} to {}/{} {}",
        finalizer,
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
        K::kind(&())
    );
    let mut updated = resource.clone();
    updated.finalizers_mut().push(finalizer.to_string());
    update_object(store, &updated).await
}

/// Remove a finalizer from a resource.
///
/// The operation is idempotent: a resource without the finalizer is left alone.
///
/// # Errors
///
/// Returns an error if the store rejects the update.
pub async fn remove_finalizer<S, K>(store: &S, resource: &K, finalizer: &str) -> Result<()>
where
    S: ClusterStore,
    K: StoreObject,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }

    info!(
        "Removing finalizer {} from {}/{} {}",
        finalizer,
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
        K::kind(&())
    );
    let mut updated = resource.clone();
    updated.finalizers_mut().retain(|f| f != finalizer);
    update_object(store, &updated).await?;
    Ok(())
}

async fn delete_workloads<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();

    delete_if_exists::<S, Deployment>(&ctx.store, &namespace, &cluster.controller_name()).await?;
    for sts in segment_store_statefulsets(ctx, cluster).await? {
        delete_if_exists::<S, StatefulSet>(&ctx.store, &namespace, &sts.name_any()).await?;
    }
    if cluster.spec.bookkeeper.is_some() {
        delete_if_exists::<S, StatefulSet>(&ctx.store, &namespace, &cluster.bookie_name())
            .await?;
    }
    Ok(())
}

/// Run the deletion sequence for a cluster marked for deletion.
///
/// # Errors
///
/// Returns an error if a store call fails, or if metadata cleanup failed and
/// attempts remain. In the latter case the attempt is recorded in the status first.
pub async fn handle_deletion<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<DeletionProgress> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    if !has_finalizer(cluster, FINALIZER_PRAVEGA_CLUSTER) {
        debug!(
            namespace = %namespace,
            name = %name,
            "Cluster is being deleted without a finalizer, nothing to clean up"
        );
        return Ok(DeletionProgress::Finalized);
    }

    info!(namespace = %namespace, name = %name, "PravegaCluster is being deleted");
    delete_workloads(ctx, cluster).await?;

    let pods: Vec<Pod> = ctx
        .store
        .list(&namespace, &cluster_labels(&name))
        .await
        .with_context(|| format!("listing pods of {namespace}/{name}"))?;
    if !pods.is_empty() {
        info!(
            namespace = %namespace,
            name = %name,
            "Waiting for {} pods to terminate before deleting metadata",
            pods.len()
        );
        return Ok(DeletionProgress::WaitingForPods {
            remaining: pods.len(),
        });
    }

    let mut cluster = cluster.clone();
    match ctx
        .cleanup
        .delete_all_metadata(&ClusterRef::from_cluster(&cluster))
        .await
    {
        Ok(()) => {
            info!(namespace = %namespace, name = %name, "Deleted cluster metadata");
            metrics::record_metadata_cleanup("success");
        }
        Err(e) => {
            let status = cluster.status.get_or_insert_with(Default::default);
            status.cleanup_attempts += 1;
            let attempts = status.cleanup_attempts;
            let max_attempts = ctx.config.cleanup_max_attempts;

            cluster = ctx
                .store
                .update_status(&cluster)
                .await
                .with_context(|| format!("recording cleanup attempt on {namespace}/{name}"))?;

            if attempts < max_attempts {
                metrics::record_metadata_cleanup("failure");
                return Err(e).with_context(|| {
                    format!(
                        "deleting metadata of {namespace}/{name} (attempt {attempts} of {max_attempts})"
                    )
                });
            }

            error!(
                namespace = %namespace,
                name = %name,
                attempts,
                "Giving up on metadata cleanup, removing finalizer anyway: {:#}",
                e
            );
            metrics::record_metadata_cleanup("abandoned");
        }
    }

    remove_finalizer(&ctx.store, &cluster, FINALIZER_PRAVEGA_CLUSTER).await?;
    metrics::forget_cluster_state(&namespace, &name);
    Ok(DeletionProgress::Finalized)
}
