// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `PravegaCluster` reconciliation.
//!
//! One pass runs these stages in order, each seeing the effects of the ones before:
//!
//! 1. Defaulting (persisted and requeued immediately when anything changed)
//! 2. Deletion handling and finalizer management
//! 3. Validation
//! 4. Convergence of config maps, services, PDBs and workloads
//! 5. Rolling restarts, scale synchronization and the version state machine
//! 6. Status recomputation
//!
//! The status is written once at the end of the pass, and only when it changed,
//! so a converged cluster produces no writes at all.

use crate::context::Context;
use crate::crd::{PravegaCluster, PravegaClusterStatus};
use crate::labels::FINALIZER_PRAVEGA_CLUSTER;
use crate::metadata::MetadataCleanup;
use crate::metrics;
use crate::reconcilers::convergence::reconcile_children;
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, DeletionProgress};
use crate::reconcilers::resources::{get_object, update_object};
use crate::reconcilers::restart::step_restarts;
use crate::reconcilers::scale::sync_cluster_size;
use crate::reconcilers::status::reconcile_cluster_status;
use crate::reconcilers::upgrade::sync_cluster_version;
use crate::reconcilers::upgrade_state_machine::ClusterState;
use crate::reconcilers::workloads::deploy_workloads;
use crate::store::ClusterStore;
use anyhow::{Context as _, Result};
use kube::runtime::controller::Action;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the controller should do after a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The cluster is gone; wait for the next watch event.
    Done,

    /// The spec was rewritten; reconcile again right away.
    RequeueNow,

    /// Reconcile again after the given delay.
    RequeueAfter(Duration),
}

impl From<ReconcileOutcome> for Action {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueNow => Action::requeue(Duration::ZERO),
            ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

/// Reconcile the `PravegaCluster` named `namespace/name`.
///
/// # Errors
///
/// Returns an error if the spec is invalid, if a store call fails, or if an
/// upgrade or restart step failed. The status computed so far is persisted before
/// the error is returned.
pub async fn reconcile_pravegacluster<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    namespace: &str,
    name: &str,
) -> Result<ReconcileOutcome> {
    let Some(mut cluster) = get_object::<S, PravegaCluster>(&ctx.store, namespace, name).await?
    else {
        debug!(namespace = %namespace, name = %name, "PravegaCluster not found, ignoring");
        return Ok(ReconcileOutcome::Done);
    };

    info!("Reconciling PravegaCluster: {}/{}", namespace, name);

    if cluster.with_defaults(&ctx.config) {
        info!(namespace = %namespace, name = %name, "Applied spec defaults");
        update_object(&ctx.store, &cluster).await?;
        metrics::record_reconciliation_requeue("PravegaCluster", "defaults");
        return Ok(ReconcileOutcome::RequeueNow);
    }

    if cluster.metadata.deletion_timestamp.is_some() {
        return match handle_deletion(ctx, &cluster).await? {
            DeletionProgress::WaitingForPods { .. } => {
                metrics::record_reconciliation_requeue("PravegaCluster", "terminating");
                Ok(ReconcileOutcome::RequeueAfter(ctx.config.termination_poll()))
            }
            DeletionProgress::Finalized => Ok(ReconcileOutcome::Done),
        };
    }

    if !ctx.config.disable_finalizer {
        cluster = ensure_finalizer(&ctx.store, &cluster, FINALIZER_PRAVEGA_CLUSTER).await?;
    }

    if let Err(e) = cluster.validate(&ctx.config) {
        warn!(namespace = %namespace, name = %name, "Invalid PravegaCluster spec: {}", e);
        metrics::record_error("PravegaCluster", "invalid_spec");
        return Err(e).with_context(|| format!("validating {namespace}/{name}"));
    }

    let mut status = cluster.status.clone().unwrap_or_default();
    status.init();
    if status.current_version.is_none() {
        status.current_version = Some(cluster.spec.version.clone());
        status.push_version_history(&cluster.spec.version);
    }

    let state = ClusterState::from_status(&cluster, &status);
    let result = reconcile_running(ctx, &cluster, &mut status, state).await;

    if cluster.status.as_ref() != Some(&status) {
        let mut updated = cluster.clone();
        updated.status = Some(status);
        ctx.store
            .update_status(&updated)
            .await
            .with_context(|| format!("writing status of {namespace}/{name}"))?;
    }

    let state = result?;
    metrics::record_cluster_state(namespace, name, state.metric_label());
    debug!(namespace = %namespace, name = %name, state = %state, "Reconcile pass complete");

    Ok(ReconcileOutcome::RequeueAfter(ctx.config.requeue_interval()))
}

async fn reconcile_running<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    state: ClusterState,
) -> Result<ClusterState> {
    reconcile_children(ctx, cluster, &state).await?;
    deploy_workloads(ctx, cluster, status, &state).await?;
    step_restarts(ctx, cluster, status, &state).await?;
    sync_cluster_size(ctx, cluster).await?;
    let state = sync_cluster_version(ctx, cluster, status, state).await?;
    reconcile_cluster_status(ctx, cluster, status).await?;
    Ok(state)
}
