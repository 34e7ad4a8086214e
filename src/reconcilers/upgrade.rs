// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Version upgrades and rollbacks.
//!
//! [`sync_cluster_version`] is called once per reconcile. It first decides whether the
//! requested version starts, redirects or reverts a transition (see
//! [`determine_version_event`]), then advances the active phase by at most one step:
//!
//! - **Controller phase**: the deployment's template is switched to the target
//!   version and the deployment controller rolls it. The phase completes once the
//!   rollout is observed and every replica is updated, ready and available.
//! - **Statefulset phases** (bookkeeper, segment store): statefulsets use `OnDelete`,
//!   so after the template switch the operator deletes one outdated pod per pass, and
//!   only when every replica has a pod, none is terminating, and every pod already at
//!   the target is ready.
//!
//! A phase that makes no progress for the upgrade timeout, a target pod stuck in a
//! faulty waiting state, or a deployment past its progress deadline fails the
//! transition. After a failed upgrade, setting the spec back to the previous version
//! rolls the components back in reverse order.
//!
//! Crossing the segment store storage-layout boundary replaces the segment store
//! statefulset with one under a different name. The old statefulset, its cache claims
//! and its external services are removed once the new one has a ready replica.

use crate::cluster_resources::{
    make_bookie_statefulset, make_controller_deployment, make_segment_store_external_services,
    make_segment_store_statefulset,
};
use crate::constants::CACHE_VOLUME_NAME;
use crate::context::Context;
use crate::crd::{Component, PravegaCluster, PravegaClusterStatus};
use crate::labels::{component_labels, VERSION_ANNOTATION};
use crate::metadata::MetadataCleanup;
use crate::metrics;
use crate::reconcilers::resources::{
    create_if_absent, delete_if_exists, get_object, update_object,
};
use crate::reconcilers::scale::ordinal_suffix;
use crate::reconcilers::status::{find_condition, is_pod_ready, parse_timestamp};
use crate::reconcilers::upgrade_state_machine::{
    determine_version_event, rollback_phases, upgrade_phases, ClusterState, ClusterStateMachine,
    FailureKind, UpgradeEvent,
};
use crate::reconcilers::workloads::{
    adopt_template, segment_store_statefulsets, template_differs,
};
use crate::status_reasons::{
    is_faulty_waiting_reason, CONDITION_TYPE_PODS_READY, CONDITION_TYPE_ROLLBACK,
    CONDITION_TYPE_UPGRADING, DEPLOYMENT_PROGRESS_DEADLINE_EXCEEDED,
    MESSAGE_PROGRESS_DEADLINE_EXCEEDED, STATUS_FALSE,
};
use crate::store::ClusterStore;
use crate::version::crosses_layout_boundary;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

/// Result of one step of a phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase's workload runs the target version on every replica and is ready.
    Complete,

    /// Work remains; `pending` replicas are not yet ready at the target version.
    InProgress { pending: i32 },

    /// The phase cannot succeed without intervention.
    Failed { message: String },
}

// ============================================================================
// Version events
// ============================================================================

fn apply_transition(
    machine: &ClusterStateMachine,
    cluster: &PravegaCluster,
    from: &ClusterState,
    event: UpgradeEvent,
    to: ClusterState,
) -> ClusterState {
    match machine.transition(from.kind(), event) {
        Some(transition) => info!(
            namespace = %cluster.namespace().unwrap_or_default(),
            name = %cluster.name_any(),
            from = %transition.from,
            to = %transition.to,
            event = %event,
            "{}",
            transition.description
        ),
        None => warn!(
            namespace = %cluster.namespace().unwrap_or_default(),
            name = %cluster.name_any(),
            from = %from,
            event = %event,
            "No transition registered for event"
        ),
    }
    to
}

/// Drop the in-flight target from the head of the history.
fn forget_target(status: &mut PravegaClusterStatus) {
    if let Some(target) = status.target_version.take() {
        if status.version_history.first() == Some(&target) {
            status.version_history.remove(0);
        }
    }
}

fn start_upgrade(cluster: &PravegaCluster, status: &mut PravegaClusterStatus) -> ClusterState {
    let version = cluster.spec.version.clone();
    status.target_version = Some(version.clone());
    status.push_version_history(&version);
    metrics::record_upgrade("upgrade", "started");

    let phase = upgrade_phases(cluster)
        .first()
        .copied()
        .unwrap_or(Component::Controller);
    // Restart the transition clock when a failed or redirected upgrade starts over.
    status.set_condition(CONDITION_TYPE_UPGRADING, STATUS_FALSE, "", "");
    let state = ClusterState::Upgrading { phase };
    state.project(status, "0");
    state
}

fn start_rollback(cluster: &PravegaCluster, status: &mut PravegaClusterStatus) -> ClusterState {
    forget_target(status);
    status.target_version = Some(cluster.spec.version.clone());
    metrics::record_upgrade("rollback", "started");

    let phase = rollback_phases(cluster)
        .first()
        .copied()
        .unwrap_or(Component::Controller);
    let state = ClusterState::RollingBack { phase };
    state.project(status, "0");
    state
}

/// React to the requested version, returning the state to drive this pass.
fn handle_version_request(
    machine: &ClusterStateMachine,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    state: ClusterState,
) -> ClusterState {
    let spec_version = cluster.spec.version.as_str();
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let Some(event) = determine_version_event(&state, spec_version, status) else {
        if state == ClusterState::Stable
            && status
                .current_version
                .as_deref()
                .is_some_and(|v| v != spec_version)
        {
            warn!(
                namespace = %namespace,
                name = %name,
                from = ?status.current_version,
                to = %spec_version,
                "Cannot start the upgrade while pods are unready"
            );
        }
        if let ClusterState::Failed {
            kind: FailureKind::Upgrade,
            ..
        } = &state
        {
            if status.target_version.as_deref() != Some(spec_version) {
                warn!(
                    namespace = %namespace,
                    name = %name,
                    version = %spec_version,
                    candidate = ?status.rollback_candidate(),
                    "Requested version is not the rollback candidate, staying in the failed state"
                );
            }
        }
        return state;
    };

    match event {
        UpgradeEvent::VersionChanged => {
            info!(
                namespace = %namespace,
                name = %name,
                from = ?status.current_version,
                to = %spec_version,
                "Starting upgrade"
            );
            if let Some(from) = status.current_version.as_deref() {
                if crosses_layout_boundary(from, spec_version) {
                    info!(
                        namespace = %namespace,
                        name = %name,
                        statefulset = %cluster.segment_store_sts_name(spec_version),
                        "Segment store moves to a new statefulset layout during this upgrade"
                    );
                }
            }
            if matches!(state, ClusterState::Failed { .. }) {
                forget_target(status);
            }
            let next = start_upgrade(cluster, status);
            apply_transition(machine, cluster, &state, event, next)
        }
        UpgradeEvent::Retargeted => {
            info!(
                namespace = %namespace,
                name = %name,
                from = ?status.target_version,
                to = %spec_version,
                "Upgrade target changed, restarting from the first phase"
            );
            forget_target(status);
            let next = start_upgrade(cluster, status);
            apply_transition(machine, cluster, &state, event, next)
        }
        UpgradeEvent::RollbackRequested => {
            info!(
                namespace = %namespace,
                name = %name,
                failed = ?status.target_version,
                to = %spec_version,
                "Starting rollback"
            );
            let next = start_rollback(cluster, status);
            apply_transition(machine, cluster, &state, event, next)
        }
        _ => state,
    }
}

// ============================================================================
// Phase drivers
// ============================================================================

/// First faulty container waiting reason of `pod`, if any.
fn faulty_reason(pod: &Pod) -> Option<String> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .filter_map(|c| c.state.as_ref()?.waiting.as_ref()?.reason.clone())
        .find(|reason| is_faulty_waiting_reason(reason))
}

fn pod_version(pod: &Pod) -> Option<&str> {
    pod.annotations().get(VERSION_ANNOTATION).map(String::as_str)
}

/// A pod at `version` stuck in a faulty waiting state.
fn faulty_target_pod(pods: &[Pod], version: &str) -> Option<String> {
    pods.iter()
        .filter(|p| pod_version(p) == Some(version))
        .find_map(|p| {
            faulty_reason(p).map(|reason| format!("pod {} is in {}", p.name_any(), reason))
        })
}

/// Pods created by the statefulset `sts_name`.
fn statefulset_pods(pods: Vec<Pod>, sts_name: &str) -> Vec<Pod> {
    pods.into_iter()
        .filter(|p| {
            let name = p.name_any();
            ordinal_suffix(&name).is_some()
                && name.rsplit_once('-').is_some_and(|(prefix, _)| prefix == sts_name)
        })
        .collect()
}

async fn component_pods<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    component: Component,
) -> Result<Vec<Pod>> {
    let namespace = cluster.namespace().unwrap_or_default();
    ctx.store
        .list(
            &namespace,
            &component_labels(&cluster.name_any(), component.label()),
        )
        .await
        .with_context(|| format!("listing {component} pods in {namespace}"))
}

/// Advance the controller deployment toward `version`.
///
/// # Errors
///
/// Returns an error if a store call fails.
pub async fn sync_controller_phase<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    version: &str,
) -> Result<PhaseOutcome> {
    let namespace = cluster.namespace().unwrap_or_default();
    let desired = make_controller_deployment(cluster, version);
    let replicas = cluster.desired_replicas(Component::Controller);

    let Some(mut live) =
        get_object::<S, Deployment>(&ctx.store, &namespace, &desired.name_any()).await?
    else {
        create_if_absent(&ctx.store, &desired).await?;
        return Ok(PhaseOutcome::InProgress { pending: replicas });
    };

    if template_differs(&live, &desired) {
        info!(
            namespace = %namespace,
            name = %cluster.name_any(),
            component = %Component::Controller,
            version = %version,
            "Updating controller deployment"
        );
        adopt_template(&mut live, &desired);
        update_object(&ctx.store, &live).await?;
        return Ok(PhaseOutcome::InProgress { pending: replicas });
    }

    let status = live.status.clone().unwrap_or_default();
    let deadline_exceeded = status.conditions.iter().flatten().any(|c| {
        c.type_ == "Progressing"
            && c.reason.as_deref() == Some(DEPLOYMENT_PROGRESS_DEADLINE_EXCEEDED)
    });
    if deadline_exceeded {
        return Ok(PhaseOutcome::Failed {
            message: format!("deployment {} exceeded its progress deadline", live.name_any()),
        });
    }

    let pods = component_pods(ctx, cluster, Component::Controller).await?;
    if let Some(message) = faulty_target_pod(&pods, version) {
        return Ok(PhaseOutcome::Failed { message });
    }

    let observed =
        status.observed_generation.unwrap_or(0) >= live.metadata.generation.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let ready = status.ready_replicas.unwrap_or(0);
    let available = status.available_replicas.unwrap_or(0);
    if observed && updated == replicas && ready == replicas && available == replicas {
        return Ok(PhaseOutcome::Complete);
    }

    debug!(
        namespace = %namespace,
        component = %Component::Controller,
        updated,
        ready,
        available,
        "Controller rollout in progress"
    );
    Ok(PhaseOutcome::InProgress {
        pending: replicas - updated.min(ready),
    })
}

/// Remove the statefulset left behind by a storage-layout migration, together with
/// its cache claims and external services.
async fn retire_statefulset<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    old: &StatefulSet,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let old_name = old.name_any();
    let old_replicas = old.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);

    info!(
        namespace = %namespace,
        name = %cluster.name_any(),
        statefulset = %old_name,
        "Retiring segment store statefulset after storage layout migration"
    );
    delete_if_exists::<S, StatefulSet>(&ctx.store, &namespace, &old_name).await?;
    for ordinal in 0..old_replicas {
        delete_if_exists::<S, PersistentVolumeClaim>(
            &ctx.store,
            &namespace,
            &format!("{CACHE_VOLUME_NAME}-{old_name}-{ordinal}"),
        )
        .await?;
        delete_if_exists::<S, Service>(&ctx.store, &namespace, &format!("{old_name}-{ordinal}"))
            .await?;
    }
    Ok(())
}

/// Advance a statefulset-backed component toward `version`.
///
/// # Errors
///
/// Returns an error if a store call fails.
pub async fn sync_statefulset_phase<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    component: Component,
    version: &str,
) -> Result<PhaseOutcome> {
    let desired = match component {
        Component::SegmentStore => make_segment_store_statefulset(cluster, version),
        Component::Bookkeeper => match make_bookie_statefulset(cluster, version) {
            Some(sts) => sts,
            None => return Ok(PhaseOutcome::Complete),
        },
        Component::Controller => return sync_controller_phase(ctx, cluster, version).await,
    };
    let namespace = cluster.namespace().unwrap_or_default();
    let sts_name = desired.name_any();
    let replicas = cluster.desired_replicas(component);

    let Some(mut live) = get_object::<S, StatefulSet>(&ctx.store, &namespace, &sts_name).await?
    else {
        info!(
            namespace = %namespace,
            name = %cluster.name_any(),
            component = %component,
            version = %version,
            "Creating statefulset {} for the target version",
            sts_name
        );
        create_if_absent(&ctx.store, &desired).await?;
        return Ok(PhaseOutcome::InProgress { pending: replicas });
    };

    if template_differs(&live, &desired) {
        info!(
            namespace = %namespace,
            name = %cluster.name_any(),
            component = %component,
            version = %version,
            "Updating statefulset {} template",
            sts_name
        );
        adopt_template(&mut live, &desired);
        live = update_object(&ctx.store, &live).await?;
    }

    let pods = component_pods(ctx, cluster, component).await?;
    if let Some(message) = faulty_target_pod(&pods, version) {
        return Ok(PhaseOutcome::Failed { message });
    }

    if component == Component::SegmentStore {
        let retired: Vec<StatefulSet> = segment_store_statefulsets(ctx, cluster)
            .await?
            .into_iter()
            .filter(|sts| sts.name_any() != sts_name)
            .collect();
        if !retired.is_empty() {
            let ready = live.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
            if ready < 1 {
                debug!(
                    namespace = %namespace,
                    statefulset = %sts_name,
                    "Waiting for a ready replica before retiring the old statefulset"
                );
                return Ok(PhaseOutcome::InProgress { pending: replicas });
            }
            for service in make_segment_store_external_services(cluster, version) {
                create_if_absent(&ctx.store, &service).await?;
            }
            for old in &retired {
                retire_statefulset(ctx, cluster, old).await?;
            }
            return Ok(PhaseOutcome::InProgress {
                pending: replicas - ready,
            });
        }
    }

    let mut pods = statefulset_pods(pods, &sts_name);
    pods.sort_by_key(ResourceExt::name_any);

    let at_target: Vec<&Pod> = pods
        .iter()
        .filter(|p| pod_version(p) == Some(version))
        .collect();
    let ready_at_target = i32::try_from(at_target.iter().filter(|p| is_pod_ready(p)).count())
        .unwrap_or(i32::MAX);
    let pending = (replicas - ready_at_target).max(0);

    if let Some(outdated) = pods.iter().find(|p| pod_version(p) != Some(version)) {
        let terminating = pods.iter().any(|p| p.metadata.deletion_timestamp.is_some());
        let missing = i32::try_from(pods.len()).unwrap_or(i32::MAX) < replicas;
        let target_ready = at_target.iter().all(|p| is_pod_ready(p));
        if terminating || missing || !target_ready {
            debug!(
                namespace = %namespace,
                component = %component,
                "Waiting for pods at the target version before replacing the next one"
            );
            return Ok(PhaseOutcome::InProgress { pending });
        }

        let pod_name = outdated.name_any();
        info!(
            namespace = %namespace,
            name = %cluster.name_any(),
            component = %component,
            version = %version,
            pod = %pod_name,
            "Replacing outdated pod"
        );
        delete_if_exists::<S, Pod>(&ctx.store, &namespace, &pod_name).await?;
        return Ok(PhaseOutcome::InProgress { pending });
    }

    if ready_at_target >= replicas {
        return Ok(PhaseOutcome::Complete);
    }
    Ok(PhaseOutcome::InProgress { pending })
}

async fn sync_phase<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    component: Component,
    version: &str,
) -> Result<PhaseOutcome> {
    match component {
        Component::Controller => sync_controller_phase(ctx, cluster, version).await,
        _ => sync_statefulset_phase(ctx, cluster, component, version).await,
    }
}

// ============================================================================
// Timeouts
// ============================================================================

/// The phase reported the same progress for longer than the upgrade timeout.
fn progress_stalled(
    status: &PravegaClusterStatus,
    condition_type: &str,
    reason: &str,
    progress: &str,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> bool {
    find_condition(&status.conditions, condition_type)
        .filter(|c| c.reason.as_deref() == Some(reason) && c.message.as_deref() == Some(progress))
        .and_then(|c| parse_timestamp(c.last_update_time.as_deref()))
        .is_some_and(|updated| now - updated > timeout)
}

/// `PodsReady` has been `False` for longer than the upgrade timeout since the
/// transition started.
fn pods_unready_too_long(
    status: &PravegaClusterStatus,
    condition_type: &str,
    now: DateTime<Utc>,
    timeout: chrono::Duration,
) -> bool {
    let Some(pods_ready) = find_condition(&status.conditions, CONDITION_TYPE_PODS_READY)
        .filter(|c| c.status == STATUS_FALSE)
    else {
        return false;
    };
    let unready_since = parse_timestamp(pods_ready.last_transition_time.as_deref());
    let transition_since = find_condition(&status.conditions, condition_type)
        .and_then(|c| parse_timestamp(c.last_transition_time.as_deref()));

    match (unready_since, transition_since) {
        (Some(unready), Some(started)) => now - unready.max(started) > timeout,
        (Some(unready), None) => now - unready > timeout,
        _ => false,
    }
}

// ============================================================================
// Driver
// ============================================================================

fn fail(
    machine: &ClusterStateMachine,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    from: &ClusterState,
    rolling_back: bool,
    message: String,
) -> ClusterState {
    let (kind, event, label) = if rolling_back {
        (FailureKind::Rollback, UpgradeEvent::RollbackFailed, "rollback")
    } else {
        (FailureKind::Upgrade, UpgradeEvent::PhaseFailed, "upgrade")
    };
    error!(
        namespace = %cluster.namespace().unwrap_or_default(),
        name = %cluster.name_any(),
        target = ?status.target_version,
        "{} failed: {}",
        label,
        message
    );
    metrics::record_upgrade(label, "failed");

    if rolling_back {
        status.target_version = None;
    }
    let next = ClusterState::Failed { kind, message };
    next.project(status, "");
    apply_transition(machine, cluster, from, event, next)
}

fn finish(
    machine: &ClusterStateMachine,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    from: &ClusterState,
    rolling_back: bool,
) -> ClusterState {
    if let Some(target) = status.target_version.take() {
        status.push_version_history(&target);
        status.current_version = Some(target);
    }
    let (event, label) = if rolling_back {
        (UpgradeEvent::RollbackCompleted, "rollback")
    } else {
        (UpgradeEvent::AllPhasesCompleted, "upgrade")
    };
    info!(
        namespace = %cluster.namespace().unwrap_or_default(),
        name = %cluster.name_any(),
        version = ?status.current_version,
        "{} complete",
        label
    );
    metrics::record_upgrade(label, "completed");

    let next = ClusterState::Stable;
    next.project(status, "");
    apply_transition(machine, cluster, from, event, next)
}

/// Advance an active upgrade or rollback by one step, moving through every phase
/// that is already complete.
async fn drive_phases<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    machine: &ClusterStateMachine,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    mut state: ClusterState,
) -> Result<ClusterState> {
    let Some(target) = status.target_version.clone() else {
        warn!(
            namespace = %cluster.namespace().unwrap_or_default(),
            name = %cluster.name_any(),
            state = %state,
            "Transition in progress without a target version, returning to stable"
        );
        let next = ClusterState::Stable;
        next.project(status, "");
        return Ok(next);
    };
    let now = Utc::now();
    let timeout = ctx.config.upgrade_timeout();

    loop {
        let (phase, rolling_back) = match state {
            ClusterState::Upgrading { phase } => (phase, false),
            ClusterState::RollingBack { phase } => (phase, true),
            _ => return Ok(state),
        };
        let (phases, condition_type) = if rolling_back {
            (rollback_phases(cluster), CONDITION_TYPE_ROLLBACK)
        } else {
            (upgrade_phases(cluster), CONDITION_TYPE_UPGRADING)
        };

        match sync_phase(ctx, cluster, phase, &target).await? {
            PhaseOutcome::Complete => {
                let next_phase = phases
                    .iter()
                    .position(|p| *p == phase)
                    .and_then(|i| phases.get(i + 1))
                    .copied();
                let Some(next_phase) = next_phase else {
                    return Ok(finish(machine, cluster, status, &state, rolling_back));
                };
                let next = if rolling_back {
                    ClusterState::RollingBack { phase: next_phase }
                } else {
                    ClusterState::Upgrading { phase: next_phase }
                };
                next.project(status, "0");
                state = apply_transition(
                    machine,
                    cluster,
                    &state,
                    UpgradeEvent::PhaseCompleted,
                    next,
                );
            }
            PhaseOutcome::InProgress { pending } => {
                let progress = pending.to_string();
                let reason = phase.progress_reason();
                if progress_stalled(status, condition_type, reason, &progress, now, timeout) {
                    return Ok(fail(
                        machine,
                        cluster,
                        status,
                        &state,
                        rolling_back,
                        format!("{MESSAGE_PROGRESS_DEADLINE_EXCEEDED} while updating {phase}"),
                    ));
                }
                if pods_unready_too_long(status, condition_type, now, timeout) {
                    return Ok(fail(
                        machine,
                        cluster,
                        status,
                        &state,
                        rolling_back,
                        format!(
                            "pods not ready for {} minutes while updating {phase}",
                            ctx.config.upgrade_timeout_mins
                        ),
                    ));
                }
                state.project(status, &progress);
                return Ok(state);
            }
            PhaseOutcome::Failed { message } => {
                return Ok(fail(machine, cluster, status, &state, rolling_back, message));
            }
        }
    }
}

/// Start, redirect or revert a version transition as requested, then advance the
/// active one.
///
/// Returns the cluster state after this pass; the conditions in `status` already
/// reflect it.
///
/// # Errors
///
/// Returns an error if a store call fails. Phase failures are not errors: they are
/// recorded on the `Error` condition.
pub async fn sync_cluster_version<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
    state: ClusterState,
) -> Result<ClusterState> {
    let machine = ClusterStateMachine::new();
    let state = handle_version_request(&machine, cluster, status, state);

    match state {
        ClusterState::Upgrading { .. } | ClusterState::RollingBack { .. } => {
            drive_phases(ctx, &machine, cluster, status, state).await
        }
        _ => Ok(state),
    }
}
