// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Workload deployment: the controller deployment and the segment store and bookie
//! statefulsets.
//!
//! Outside an upgrade or rollback, workloads are kept at the cluster's current
//! version: missing ones are created and ones whose pod template drifted from the
//! desired template (detected through the template hash annotation) are updated.
//! Statefulsets use the `OnDelete` strategy, so a template update also schedules a
//! rolling restart of their pods. During an upgrade or rollback the phase executors
//! own the workloads and this pass does nothing.

use crate::cluster_resources::{
    make_bookie_statefulset, make_controller_deployment, make_segment_store_statefulset,
    template_hash_of,
};
use crate::context::Context;
use crate::crd::{Component, PravegaCluster, PravegaClusterStatus};
use crate::labels::{component_labels, TEMPLATE_HASH_ANNOTATION};
use crate::metadata::MetadataCleanup;
use crate::reconcilers::resources::{create_if_absent, get_object, update_object};
use crate::reconcilers::restart::plan_restart;
use crate::reconcilers::upgrade_state_machine::ClusterState;
use crate::store::{ClusterStore, StoreObject};
use anyhow::{Context as _, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use tracing::{debug, info};

/// Workload kinds whose pod template can be swapped in place.
pub trait Workload: StoreObject {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;

    fn pod_template(&self) -> Option<&PodTemplateSpec>;
}

impl Workload for Deployment {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|s| &mut s.template)
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

impl Workload for StatefulSet {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|s| &mut s.template)
    }

    fn pod_template(&self) -> Option<&PodTemplateSpec> {
        self.spec.as_ref().map(|s| &s.template)
    }
}

/// Whether `live` was built from a different template than `desired`.
#[must_use]
pub fn template_differs<W: Workload>(live: &W, desired: &W) -> bool {
    template_hash_of(live.meta()) != template_hash_of(desired.meta())
}

/// Copy the pod template and its hash from `desired` onto `live`, keeping everything
/// else (replica count included) as it is.
pub fn adopt_template<W: Workload>(live: &mut W, desired: &W) {
    if let (Some(template), Some(target)) = (desired.pod_template(), live.pod_template_mut()) {
        *target = template.clone();
    }
    if let Some(hash) = template_hash_of(desired.meta()).map(str::to_string) {
        live.meta_mut()
            .annotations
            .get_or_insert_with(Default::default)
            .insert(TEMPLATE_HASH_ANNOTATION.to_string(), hash);
    }
}

/// Segment store statefulsets of the cluster. More than one means a storage-layout
/// migration is in progress.
///
/// # Errors
///
/// Returns an error if the statefulsets cannot be listed.
pub async fn segment_store_statefulsets<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<Vec<StatefulSet>> {
    let namespace = cluster.namespace().unwrap_or_default();
    ctx.store
        .list(
            &namespace,
            &component_labels(&cluster.name_any(), Component::SegmentStore.label()),
        )
        .await
        .with_context(|| format!("listing segment store statefulsets in {namespace}"))
}

/// Ensure `desired` exists and, when `refresh` is set, that its template is current.
///
/// Returns `true` if an existing workload's template was replaced.
async fn ensure_workload<S, W>(store: &S, desired: &W, refresh: bool) -> Result<bool>
where
    S: ClusterStore,
    W: Workload,
{
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();

    let Some(mut live) = get_object::<S, W>(store, &namespace, &name).await? else {
        create_if_absent(store, desired).await?;
        return Ok(false);
    };

    if !refresh {
        debug!("{} {}/{} left for the pending upgrade", W::kind(&()), namespace, name);
        return Ok(false);
    }
    if !template_differs(&live, desired) {
        debug!("{} {}/{} template is current", W::kind(&()), namespace, name);
        return Ok(false);
    }

    info!(
        "{} {}/{} pod template changed, updating",
        W::kind(&()),
        namespace,
        name
    );
    adopt_template(&mut live, desired);
    update_object(store, &live).await?;
    Ok(true)
}

/// Create missing workloads and refresh drifted templates at the current version.
///
/// Only acts while the cluster is stable. While a version change is waiting to
/// start, missing workloads are still created but templates are left alone, so the
/// upgrade is the only thing that rolls the pods.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn deploy_workloads<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    state: &ClusterState,
) -> Result<()> {
    if !state.is_stable() {
        debug!(
            namespace = %cluster.namespace().unwrap_or_default(),
            name = %cluster.name_any(),
            state = %state,
            "Workloads are driven by the version state machine"
        );
        return Ok(());
    }

    let version = cluster.effective_version();
    let refresh = !status.is_version_change_pending(&cluster.spec.version);

    if let Some(bookies) = make_bookie_statefulset(cluster, &version) {
        if ensure_workload(&ctx.store, &bookies, refresh).await? {
            plan_restart(ctx, cluster, status, Component::Bookkeeper).await?;
        }
    }

    // A second segment store statefulset means a migration was interrupted; the
    // upgrade state machine finishes it.
    if segment_store_statefulsets(ctx, cluster).await?.len() <= 1 {
        let segment_store = make_segment_store_statefulset(cluster, &version);
        if ensure_workload(&ctx.store, &segment_store, refresh).await? {
            plan_restart(ctx, cluster, status, Component::SegmentStore).await?;
        }
    }

    let controller = make_controller_deployment(cluster, &version);
    ensure_workload(&ctx.store, &controller, refresh).await?;

    Ok(())
}
