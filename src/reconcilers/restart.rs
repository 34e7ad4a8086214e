// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Rolling pod restarts for `OnDelete` statefulsets.
//!
//! When a statefulset's pod template changes outside an upgrade, its pods keep
//! running the old template until they are deleted. A restart plan, persisted in
//! `status.restarts`, replaces them one at a time without blocking a reconcile:
//!
//! 1. delete the next pending pod and remember its UID and the deletion time
//! 2. on later passes, wait until a ready pod with a different UID holds the name
//!    and the statefulset reports every replica ready
//! 3. repeat until nothing is pending
//!
//! A replacement that is not ready within the pod-ready timeout drops the plan and
//! fails the reconcile. Plans are discarded as soon as the cluster leaves the stable
//! state, because the upgrade phases replace every pod anyway.

use crate::context::Context;
use crate::crd::{Component, PravegaCluster, PravegaClusterStatus, RestartProgress};
use crate::labels::component_labels;
use crate::metadata::MetadataCleanup;
use crate::metrics;
use crate::reconcilers::resources::{delete_if_exists, get_object};
use crate::reconcilers::status::{is_pod_ready, parse_timestamp};
use crate::reconcilers::upgrade_state_machine::ClusterState;
use crate::store::ClusterStore;
use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, error, info};

/// Record a restart of every current pod of `component`, replacing any earlier plan
/// for it.
///
/// # Errors
///
/// Returns an error if the pods cannot be listed.
pub async fn plan_restart<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    component: Component,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let pods: Vec<Pod> = ctx
        .store
        .list(
            &namespace,
            &component_labels(&cluster.name_any(), component.label()),
        )
        .await
        .with_context(|| format!("listing {component} pods in {namespace}"))?;

    let mut pending: Vec<String> = pods.iter().map(ResourceExt::name_any).collect();
    pending.sort();

    status.restarts.retain(|r| r.component != component);
    if pending.is_empty() {
        return Ok(());
    }

    info!(
        namespace = %namespace,
        name = %cluster.name_any(),
        component = %component,
        "Scheduling rolling restart of {} pods",
        pending.len()
    );
    status.restarts.push(RestartProgress {
        component,
        pending,
        current: None,
        current_uid: None,
        since: None,
    });
    Ok(())
}

/// Name of the statefulset running `component` at the cluster's current version.
fn statefulset_name(cluster: &PravegaCluster, component: Component) -> Option<String> {
    match component {
        Component::Bookkeeper => Some(cluster.bookie_name()),
        Component::SegmentStore => {
            Some(cluster.segment_store_sts_name(&cluster.effective_version()))
        }
        Component::Controller => None,
    }
}

async fn statefulset_ready<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    component: Component,
) -> Result<bool> {
    let Some(name) = statefulset_name(cluster, component) else {
        return Ok(true);
    };
    let namespace = cluster.namespace().unwrap_or_default();
    let Some(sts) = get_object::<S, StatefulSet>(&ctx.store, &namespace, &name).await? else {
        return Ok(false);
    };

    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = sts
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    Ok(ready == desired)
}

/// Advance the first restart plan by one step.
///
/// # Errors
///
/// Returns an error if a store call fails or if a replacement pod missed the
/// pod-ready timeout.
pub async fn step_restarts<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    state: &ClusterState,
) -> Result<()> {
    if status.restarts.is_empty() {
        return Ok(());
    }

    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    if !state.is_stable() || status.is_version_change_pending(&cluster.spec.version) {
        info!(
            namespace = %namespace,
            name = %name,
            state = %state,
            "Dropping rolling restarts, the version is changing"
        );
        status.restarts.clear();
        return Ok(());
    }

    let mut plan = status.restarts.remove(0);
    let component = plan.component;

    if let Some(current) = plan.current.clone() {
        let live: Option<Pod> = get_object(&ctx.store, &namespace, &current).await?;
        let replaced = live
            .as_ref()
            .is_some_and(|pod| pod.uid() != plan.current_uid && is_pod_ready(pod));
        let ready = replaced && statefulset_ready(ctx, cluster, component).await?;

        if !ready {
            let since = parse_timestamp(plan.since.as_deref()).unwrap_or_else(Utc::now);
            if Utc::now() - since > ctx.config.pod_ready_timeout() {
                error!(
                    namespace = %namespace,
                    name = %name,
                    component = %component,
                    pod = %current,
                    "Replacement pod did not become ready in time, abandoning rolling restart"
                );
                metrics::record_error("PravegaCluster", "pod_ready_timeout");
                bail!(
                    "timed out after {} minutes waiting for pod {}/{} to become ready",
                    ctx.config.pod_ready_timeout_mins,
                    namespace,
                    current
                );
            }
            debug!(
                namespace = %namespace,
                component = %component,
                pod = %current,
                "Waiting for replacement pod to become ready"
            );
            status.restarts.insert(0, plan);
            return Ok(());
        }

        plan.current = None;
        plan.current_uid = None;
        plan.since = None;
    }

    let Some(next) = (!plan.pending.is_empty()).then(|| plan.pending.remove(0)) else {
        info!(
            namespace = %namespace,
            name = %name,
            component = %component,
            "Rolling restart complete"
        );
        return Ok(());
    };

    let live: Option<Pod> = get_object(&ctx.store, &namespace, &next).await?;
    if let Some(pod) = live {
        info!(
            namespace = %namespace,
            name = %name,
            component = %component,
            pod = %next,
            "Restarting pod"
        );
        if delete_if_exists::<S, Pod>(&ctx.store, &namespace, &next).await? {
            metrics::record_pod_restart(component.label());
            plan.current = Some(next);
            plan.current_uid = pod.uid();
            plan.since = Some(Utc::now().to_rfc3339());
        }
    }

    status.restarts.insert(0, plan);
    Ok(())
}
