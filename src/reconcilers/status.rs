// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status model for `PravegaCluster` resources.
//!
//! The cluster status carries four condition types (`PodsReady`, `Upgrading`,
//! `Rollback` and `Error`) plus version bookkeeping and member lists. This module
//! owns every rule about how those fields change:
//!
//! - at most one condition exists per type
//! - setting a condition to the status/reason/message it already has is a no-op
//! - `lastTransitionTime` moves only when the status changes
//! - `lastUpdateTime` moves whenever the record is rewritten
//!
//! # Condition Format
//!
//! - `type`: `PodsReady`, `Upgrading`, `Rollback` or `Error`
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: A programmatic identifier (CamelCase), e.g. `UpdatingSegmentstore`
//! - `message`: A human-readable explanation, or the pending pod count during a phase
//!
//! # Example
//!
//! ```rust,no_run
//! use pravega_operator::crd::PravegaClusterStatus;
//! use pravega_operator::status_reasons::{CONDITION_TYPE_UPGRADING, STATUS_TRUE};
//!
//! let mut status = PravegaClusterStatus::default();
//! status.init();
//! status.set_condition(CONDITION_TYPE_UPGRADING, STATUS_TRUE, "UpdatingController", "2");
//! assert!(status.is_upgrading());
//! ```

use crate::context::Context;
use crate::crd::{Condition, PravegaCluster, PravegaClusterStatus};
use crate::labels::cluster_labels;
use crate::metadata::MetadataCleanup;
use crate::status_reasons::{
    CONDITION_TYPE_ERROR, CONDITION_TYPE_PODS_READY, CONDITION_TYPE_ROLLBACK,
    CONDITION_TYPE_UPGRADING, REASON_ROLLBACK_FAILED, REASON_UPGRADE_FAILED, STATUS_FALSE,
    STATUS_TRUE, STATUS_UNKNOWN,
};
use crate::store::ClusterStore;
use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Create a new condition stamped with the current time.
///
/// Both `lastUpdateTime` and `lastTransitionTime` are set to now. Empty reasons
/// and messages are stored as absent.
///
/// # Arguments
///
/// * `condition_type` - The type of condition (e.g., "PodsReady", "Upgrading")
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase` (e.g., "`UpgradeFailed`")
/// * `message` - A human-readable explanation
///
/// # Returns
///
/// A new `Condition` with the current timestamp.
///
/// # Example
///
/// ```rust,no_run
/// # use pravega_operator::reconcilers::status::create_condition;
/// let condition = create_condition("Error", "True", "UpgradeFailed", "pod crash looping");
/// assert_eq!(condition.r#type, "Error");
/// assert_eq!(condition.status, "True");
/// ```
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> Condition {
    let now = Utc::now().to_rfc3339();
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: non_empty(reason),
        message: non_empty(message),
        last_update_time: Some(now.clone()),
        last_transition_time: Some(now),
    }
}

/// Find a condition by type in a list of conditions.
///
/// # Arguments
///
/// * `conditions` - The list of conditions to search
/// * `condition_type` - The type of condition to find (e.g., "Upgrading")
///
/// # Returns
///
/// The matching condition if found, otherwise `None`.
#[must_use]
pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Find a condition and its position in the list.
///
/// `None` means the condition has never been set, which callers must keep distinct
/// from a condition whose status is `False`.
#[must_use]
pub fn get_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<(usize, &'a Condition)> {
    conditions
        .iter()
        .enumerate()
        .find(|(_, c)| c.r#type == condition_type)
}

/// Upsert a condition in a mutable conditions list (in-memory, no API call).
///
/// If a condition of the same type already carries the same status, reason and
/// message, nothing changes, timestamps included. Otherwise the record is rewritten:
/// `lastUpdateTime` is set to now and `lastTransitionTime` is set to now only when
/// the status differs from the previous one.
///
/// **Important:** This function does NOT make any Kubernetes API calls. The
/// reconcile loop persists the status once at the end of the pass.
///
/// # Arguments
///
/// * `conditions` - Mutable reference to the conditions list
/// * `condition_type` - The type of condition (e.g., "Upgrading")
/// * `status` - The status: "True", "False", or "Unknown"
/// * `reason` - A programmatic identifier in `CamelCase`
/// * `message` - A human-readable explanation
///
/// # Returns
///
/// `true` if the list was modified.
///
/// # Example
///
/// ```rust,no_run
/// # use pravega_operator::reconcilers::status::set_condition;
/// let mut conditions = vec![];
/// assert!(set_condition(&mut conditions, "PodsReady", "True", "", ""));
/// assert!(!set_condition(&mut conditions, "PodsReady", "True", "", ""));
/// ```
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> bool {
    let reason = non_empty(reason);
    let message = non_empty(message);

    let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition_type) else {
        let mut condition = create_condition(condition_type, status, "", "");
        condition.reason = reason;
        condition.message = message;
        conditions.push(condition);
        return true;
    };

    if existing.status == status && existing.reason == reason && existing.message == message {
        return false;
    }

    let now = Utc::now().to_rfc3339();
    if existing.status != status {
        existing.last_transition_time = Some(now.clone());
    }
    existing.status = status.to_string();
    existing.reason = reason;
    existing.message = message;
    existing.last_update_time = Some(now);
    true
}

/// Parse an RFC3339 timestamp stored on a status record.
#[must_use]
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

impl PravegaClusterStatus {
    /// Ensure the base conditions exist.
    ///
    /// `PodsReady` starts `Unknown`, `Upgrading` and `Error` start `False`.
    /// Existing conditions are left alone, so this is safe on every reconcile.
    pub fn init(&mut self) {
        for (condition_type, status) in [
            (CONDITION_TYPE_PODS_READY, STATUS_UNKNOWN),
            (CONDITION_TYPE_UPGRADING, STATUS_FALSE),
            (CONDITION_TYPE_ERROR, STATUS_FALSE),
        ] {
            if find_condition(&self.conditions, condition_type).is_none() {
                self.conditions
                    .push(create_condition(condition_type, status, "", ""));
            }
        }
    }

    /// See [`set_condition`].
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: &str,
        reason: &str,
        message: &str,
    ) -> bool {
        set_condition(&mut self.conditions, condition_type, status, reason, message)
    }

    /// See [`get_condition`].
    #[must_use]
    pub fn get_condition(&self, condition_type: &str) -> Option<(usize, &Condition)> {
        get_condition(&self.conditions, condition_type)
    }

    fn condition_is(&self, condition_type: &str, status: &str) -> bool {
        find_condition(&self.conditions, condition_type).is_some_and(|c| c.status == status)
    }

    fn condition_reason_is(&self, condition_type: &str, reason: &str) -> bool {
        find_condition(&self.conditions, condition_type)
            .is_some_and(|c| c.status == STATUS_TRUE && c.reason.as_deref() == Some(reason))
    }

    #[must_use]
    pub fn is_upgrading(&self) -> bool {
        self.condition_is(CONDITION_TYPE_UPGRADING, STATUS_TRUE)
    }

    #[must_use]
    pub fn is_rolling_back(&self) -> bool {
        self.condition_is(CONDITION_TYPE_ROLLBACK, STATUS_TRUE)
    }

    #[must_use]
    pub fn is_pods_ready(&self) -> bool {
        self.condition_is(CONDITION_TYPE_PODS_READY, STATUS_TRUE)
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        self.condition_is(CONDITION_TYPE_ERROR, STATUS_TRUE)
    }

    /// `Error` is `True` because an upgrade failed.
    #[must_use]
    pub fn has_upgrade_failed(&self) -> bool {
        self.condition_reason_is(CONDITION_TYPE_ERROR, REASON_UPGRADE_FAILED)
    }

    /// `Error` is `True` because a rollback failed.
    #[must_use]
    pub fn has_rollback_failed(&self) -> bool {
        self.condition_reason_is(CONDITION_TYPE_ERROR, REASON_ROLLBACK_FAILED)
    }

    /// Version a failed upgrade can be rolled back to: the history entry just
    /// behind the failed target.
    #[must_use]
    pub fn rollback_candidate(&self) -> Option<&str> {
        self.version_history.get(1).map(String::as_str)
    }

    /// The cluster is in the upgrade-failed state and `spec_version` is the version
    /// it ran before the failed target.
    #[must_use]
    pub fn is_rollback_triggered(&self, spec_version: &str) -> bool {
        self.has_upgrade_failed() && self.rollback_candidate() == Some(spec_version)
    }

    /// `spec_version` is not the version the cluster runs.
    #[must_use]
    pub fn is_version_change_pending(&self, spec_version: &str) -> bool {
        self.current_version.as_deref() != Some(spec_version)
    }

    /// Put `version` at the head of the history, dropping any older occurrence.
    pub fn push_version_history(&mut self, version: &str) {
        self.version_history.retain(|v| v != version);
        self.version_history.insert(0, version.to_string());
    }
}

/// A pod whose `Ready` condition is `True`.
#[must_use]
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == STATUS_TRUE)
        })
}

/// Recompute member lists, replica counts and `PodsReady` from the live pods.
///
/// # Errors
///
/// Returns an error if the pods cannot be listed.
pub async fn reconcile_cluster_status<S: ClusterStore, M: MetadataCleanup>(
    ctx: &Context<S, M>,
    cluster: &PravegaCluster,
    status: &mut PravegaClusterStatus,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let pods: Vec<Pod> = ctx
        .store
        .list(&namespace, &cluster_labels(&name))
        .await
        .with_context(|| format!("listing pods of cluster {namespace}/{name}"))?;

    let (mut ready, mut unready): (Vec<String>, Vec<String>) = (Vec::new(), Vec::new());
    for pod in &pods {
        if is_pod_ready(pod) {
            ready.push(pod.name_any());
        } else {
            unready.push(pod.name_any());
        }
    }
    ready.sort();
    unready.sort();

    let expected = cluster.expected_members();
    let ready_count = i32::try_from(ready.len()).unwrap_or(i32::MAX);

    status.replicas = expected;
    status.current_replicas = i32::try_from(pods.len()).unwrap_or(i32::MAX);
    status.ready_replicas = ready_count;
    status.members.ready = ready;
    status.members.unready = unready;

    let pods_ready = if ready_count == expected {
        STATUS_TRUE
    } else {
        STATUS_FALSE
    };
    if status.set_condition(CONDITION_TYPE_PODS_READY, pods_ready, "", "") {
        debug!(
            namespace = %namespace,
            name = %name,
            ready = ready_count,
            expected = expected,
            "PodsReady changed to {}",
            pods_ready
        );
    }
    status.observed_generation = cluster.metadata.generation;

    Ok(())
}
