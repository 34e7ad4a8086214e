// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Convergence of the non-workload children: config maps, services and PDBs.
//!
//! Each desired object comes from the manifest builders in
//! [`crate::cluster_resources`]. Absent objects are created; present ones get a
//! targeted update of the fields the operator owns and are otherwise left alone.
//!
//! Config map changes reach the pods through the config hash on the pod templates:
//! the workload pass sees the template change and rolls the pods, unless an upgrade is
//! in flight, in which case the phase executors replace the pods anyway.

use crate::cluster_resources::{
    make_bookie_headless_service, make_config_map, make_controller_service, make_pdb_for,
    make_segment_store_external_services, make_segment_store_headless_service,
};
use crate::context::Context;
use crate::crd::{Component, PravegaCluster};
use crate::labels::EXTERNAL_DNS_HOSTNAME_ANNOTATION;
use crate::metadata::MetadataCleanup;
use crate::reconcilers::resources::{
    create_if_absent, create_or_update, delete_if_exists, get_object, Applied,
};
use crate::reconcilers::upgrade_state_machine::ClusterState;
use crate::store::ClusterStore;
use anyhow::Result;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::ResourceExt;
use tracing::{debug, info};

/// Reconcile every config map, service and PDB of the cluster.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn reconcile_children<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    state: &ClusterState,
) -> Result<()> {
    reconcile_config_maps(ctx, cluster).await?;
    reconcile_services(ctx, cluster, state).await?;
    reconcile_pdbs(ctx, cluster).await
}

// ============================================================================
// Config maps
// ============================================================================

fn sync_config_map(live: &mut ConfigMap, desired: &ConfigMap) -> bool {
    if live.data == desired.data {
        return false;
    }
    live.data.clone_from(&desired.data);
    true
}

/// Create or update the config map of every component.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn reconcile_config_maps<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<()> {
    for component in Component::UPGRADE_ORDER {
        let Some(desired) = make_config_map(cluster, component) else {
            continue;
        };
        if create_or_update(&ctx.store, &desired, sync_config_map).await? == Applied::Updated {
            info!(
                namespace = %cluster.namespace().unwrap_or_default(),
                name = %cluster.name_any(),
                component = %component,
                "Configuration of {} changed",
                component
            );
        }
    }
    Ok(())
}

// ============================================================================
// Services
// ============================================================================

/// Port identity the operator cares about: name and number.
fn port_keys(ports: Option<&Vec<ServicePort>>) -> Vec<(Option<String>, i32)> {
    ports
        .map(|p| p.iter().map(|p| (p.name.clone(), p.port)).collect())
        .unwrap_or_default()
}

fn sync_ports(live: &mut Service, desired: &Service) -> bool {
    let desired_ports = desired.spec.as_ref().and_then(|s| s.ports.as_ref());
    let live_spec = live.spec.get_or_insert_with(Default::default);
    if port_keys(live_spec.ports.as_ref()) == port_keys(desired_ports) {
        return false;
    }
    live_spec.ports = desired_ports.cloned();
    true
}

fn sync_controller_service(live: &mut Service, desired: &Service) -> bool {
    let mut changed = false;

    if live.metadata.labels != desired.metadata.labels {
        live.metadata.labels.clone_from(&desired.metadata.labels);
        changed = true;
    }
    let live_annotations = live.metadata.annotations.clone().unwrap_or_default();
    let desired_annotations = desired.metadata.annotations.clone().unwrap_or_default();
    if live_annotations != desired_annotations {
        live.metadata.annotations = Some(desired_annotations);
        changed = true;
    }

    let desired_spec = desired.spec.clone().unwrap_or_default();
    let live_spec = live.spec.get_or_insert_with(Default::default);
    if live_spec.selector != desired_spec.selector {
        live_spec.selector = desired_spec.selector;
        changed = true;
    }
    if live_spec.type_ != desired_spec.type_ {
        live_spec.type_ = desired_spec.type_;
        changed = true;
    }

    sync_ports(live, desired) || changed
}

fn external_dns_hostname(service: &Service) -> Option<&String> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(EXTERNAL_DNS_HOSTNAME_ANNOTATION))
}

/// Create or update the controller and headless services, and create the per-replica
/// external services.
///
/// External services are only managed while the cluster is stable: during an upgrade
/// the segment store statefulset they select may be mid-migration. A service whose
/// external DNS hostname changed is recreated, because load balancers do not pick up
/// hostname changes on a live service.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn reconcile_services<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    state: &ClusterState,
) -> Result<()> {
    create_or_update(
        &ctx.store,
        &make_controller_service(cluster),
        sync_controller_service,
    )
    .await?;
    create_or_update(
        &ctx.store,
        &make_segment_store_headless_service(cluster),
        sync_ports,
    )
    .await?;
    if let Some(service) = make_bookie_headless_service(cluster) {
        create_or_update(&ctx.store, &service, sync_ports).await?;
    }

    if !state.is_stable() {
        debug!(
            namespace = %cluster.namespace().unwrap_or_default(),
            name = %cluster.name_any(),
            state = %state,
            "Skipping external services while the version is changing"
        );
        return Ok(());
    }

    let namespace = cluster.namespace().unwrap_or_default();
    for desired in make_segment_store_external_services(cluster, &cluster.effective_version()) {
        let name = desired.name_any();
        let Some(live) = get_object::<S, Service>(&ctx.store, &namespace, &name).await? else {
            create_if_absent(&ctx.store, &desired).await?;
            continue;
        };

        if external_dns_hostname(&live) != external_dns_hostname(&desired) {
            info!(
                namespace = %namespace,
                service = %name,
                "External DNS hostname of {} changed, recreating the service",
                name
            );
            delete_if_exists::<S, Service>(&ctx.store, &namespace, &name).await?;
            create_if_absent(&ctx.store, &desired).await?;
        }
    }
    Ok(())
}

// ============================================================================
// Pod disruption budgets
// ============================================================================

fn sync_pdb(live: &mut PodDisruptionBudget, desired: &PodDisruptionBudget) -> bool {
    let desired_max = desired.spec.as_ref().and_then(|s| s.max_unavailable.clone());
    let live_spec = live.spec.get_or_insert_with(Default::default);
    if live_spec.max_unavailable == desired_max {
        return false;
    }
    live_spec.max_unavailable = desired_max;
    true
}

/// Create or update the PDB of every component.
///
/// # Errors
///
/// Returns an error if any store call fails.
pub async fn reconcile_pdbs<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
) -> Result<()> {
    for component in Component::UPGRADE_ORDER {
        if let Some(desired) = make_pdb_for(cluster, component) {
            create_or_update(&ctx.store, &desired, sync_pdb).await?;
        }
    }
    Ok(())
}
