// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Scale synchronizer.
//!
//! Keeps each workload's replica count at the value in the cluster spec. Scaling a
//! statefulset down leaves its per-replica objects behind, so on scale-down the
//! persistent volume claims and per-replica external services whose ordinal is at or
//! beyond the new replica count are deleted too.
//!
//! Segment store scaling pauses while a storage-layout migration runs, that is while
//! two segment store statefulsets exist side by side.

use crate::context::Context;
use crate::crd::{Component, PravegaCluster};
use crate::labels::component_labels;
use crate::metadata::MetadataCleanup;
use crate::reconcilers::resources::{delete_if_exists, get_object, update_object};
use crate::reconcilers::workloads::segment_store_statefulsets;
use crate::store::ClusterStore;
use anyhow::{Context as _, Result};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kube::ResourceExt;
use tracing::{debug, info};

/// Trailing `-<n>` ordinal of a per-replica object name.
#[must_use]
pub fn ordinal_suffix(name: &str) -> Option<i32> {
    let (_, ordinal) = name.rsplit_once('-')?;
    ordinal.parse().ok()
}

/// Whether `name` belongs to a replica of `sts_name` that no longer exists at
/// `replicas` replicas.
///
/// Matches pod-derived names (`<sts>-<n>`) and claim names (`<claim>-<sts>-<n>`).
#[must_use]
pub fn is_orphan(name: &str, sts_name: &str, replicas: i32) -> bool {
    let (Some((prefix, _)), Some(ordinal)) = (name.rsplit_once('-'), ordinal_suffix(name)) else {
        return false;
    };
    (prefix == sts_name || prefix.ends_with(&format!("-{sts_name}"))) && ordinal >= replicas
}

/// Bring every workload's replica count in line with the spec.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn sync_cluster_size<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<()> {
    if cluster.spec.bookkeeper.is_some() {
        let namespace = cluster.namespace().unwrap_or_default();
        if let Some(sts) =
            get_object::<S, StatefulSet>(&ctx.store, &namespace, &cluster.bookie_name()).await?
        {
            sync_statefulset_size(ctx, cluster, sts, Component::Bookkeeper).await?;
        }
    }

    let mut segment_stores = segment_store_statefulsets(ctx, cluster).await?;
    if segment_stores.len() > 1 {
        debug!(
            namespace = %cluster.namespace().unwrap_or_default(),
            name = %cluster.name_any(),
            "Segment store migration in progress, not scaling"
        );
    } else if let Some(sts) = segment_stores.pop() {
        sync_statefulset_size(ctx, cluster, sts, Component::SegmentStore).await?;
    }

    sync_controller_size(ctx, cluster).await
}

async fn sync_controller_size<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let Some(mut deployment) =
        get_object::<S, Deployment>(&ctx.store, &namespace, &cluster.controller_name()).await?
    else {
        return Ok(());
    };

    let desired = cluster.desired_replicas(Component::Controller);
    let spec = deployment.spec.get_or_insert_with(Default::default);
    if spec.replicas == Some(desired) {
        return Ok(());
    }

    info!(
        namespace = %namespace,
        name = %cluster.name_any(),
        component = %Component::Controller,
        "Scaling controller from {:?} to {} replicas",
        spec.replicas,
        desired
    );
    spec.replicas = Some(desired);
    update_object(&ctx.store, &deployment).await?;
    Ok(())
}

async fn sync_statefulset_size<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    mut sts: StatefulSet,
    component: Component,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let sts_name = sts.name_any();
    let desired = cluster.desired_replicas(component);
    let spec = sts.spec.get_or_insert_with(Default::default);
    let current = spec.replicas.unwrap_or(1);

    if current != desired {
        info!(
            namespace = %namespace,
            name = %cluster.name_any(),
            component = %component,
            "Scaling {} from {} to {} replicas",
            sts_name,
            current,
            desired
        );
        spec.replicas = Some(desired);
        update_object(&ctx.store, &sts).await?;
    }

    // Swept every pass, so a cleanup interrupted after the replica patch resumes.
    cleanup_orphans(ctx, cluster, &sts_name, component, desired).await
}

/// Delete the claims and external services of replicas at or beyond `replicas`.
///
/// # Errors
///
/// Returns an error if listing or deleting fails.
pub async fn cleanup_orphans<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    sts_name: &str,
    component: Component,
    replicas: i32,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let labels = component_labels(&cluster.name_any(), component.label());

    let claims: Vec<PersistentVolumeClaim> = ctx
        .store
        .list(&namespace, &labels)
        .await
        .with_context(|| format!("listing {component} claims in {namespace}"))?;
    for claim in claims {
        let name = claim.name_any();
        if is_orphan(&name, sts_name, replicas) {
            delete_if_exists::<S, PersistentVolumeClaim>(&ctx.store, &namespace, &name).await?;
        }
    }

    let services: Vec<Service> = ctx
        .store
        .list(&namespace, &labels)
        .await
        .with_context(|| format!("listing {component} services in {namespace}"))?;
    for service in services {
        let name = service.name_any();
        if is_orphan(&name, sts_name, replicas) {
            delete_if_exists::<S, Service>(&ctx.store, &namespace, &name).await?;
        }
    }
    Ok(())
}
