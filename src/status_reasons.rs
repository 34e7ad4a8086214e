// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Standard Kubernetes status condition types and reasons for `PravegaCluster` resources.
//!
//! Reasons are programmatic identifiers in CamelCase that explain why a condition has
//! a particular status.
//!
//! # Condition Types
//!
//! A cluster carries at most one condition of each of these types:
//!
//! - `PodsReady` - all expected controller, segment store and bookie pods are ready
//! - `Upgrading` - a forward version upgrade is in flight
//! - `Rollback` - an automatic rollback to the last good version is in flight
//! - `Error` - the last upgrade or rollback failed
//!
//! While a phase is running, the `Upgrading` or `Rollback` condition's reason names the
//! phase and its message holds the number of pods still to be brought to the target version.
//!
//! # Example Status
//!
//! ```yaml
//! status:
//!   conditions:
//!     - type: PodsReady
//!       status: "False"
//!     - type: Upgrading
//!       status: "True"
//!       reason: UpdatingSegmentstore
//!       message: "2"
//!     - type: Error
//!       status: "False"
//! ```

// ============================================================================
// Condition Types
// ============================================================================

/// All expected pods are running and ready.
pub const CONDITION_TYPE_PODS_READY: &str = "PodsReady";

/// A version upgrade is in progress.
pub const CONDITION_TYPE_UPGRADING: &str = "Upgrading";

/// A rollback to the previous version is in progress.
pub const CONDITION_TYPE_ROLLBACK: &str = "Rollback";

/// The last upgrade or rollback failed.
pub const CONDITION_TYPE_ERROR: &str = "Error";

// ============================================================================
// Condition Status Values
// ============================================================================

/// Condition holds.
pub const STATUS_TRUE: &str = "True";

/// Condition does not hold.
pub const STATUS_FALSE: &str = "False";

/// Condition has not been evaluated yet.
pub const STATUS_UNKNOWN: &str = "Unknown";

// ============================================================================
// Phase Progress Reasons
// ============================================================================

/// The bookkeeper statefulset is being moved to the target version.
pub const REASON_UPDATING_BOOKKEEPER: &str = "UpdatingBookkeeper";

/// The segment store statefulset is being moved to the target version.
pub const REASON_UPDATING_SEGMENT_STORE: &str = "UpdatingSegmentstore";

/// The controller deployment is being moved to the target version.
pub const REASON_UPDATING_CONTROLLER: &str = "UpdatingController";

// ============================================================================
// Failure Reasons
// ============================================================================

/// A forward upgrade failed. `Upgrading` stays `True` until a rollback or a new target.
pub const REASON_UPGRADE_FAILED: &str = "UpgradeFailed";

/// A rollback failed. Manual intervention or a new target version is required.
pub const REASON_ROLLBACK_FAILED: &str = "RollbackFailed";

// ============================================================================
// Failure Messages
// ============================================================================

/// A phase made no progress for longer than the upgrade timeout.
pub const MESSAGE_PROGRESS_DEADLINE_EXCEEDED: &str = "progress deadline exceeded";

/// Deployment condition reason reported by Kubernetes when a rollout stalls.
pub const DEPLOYMENT_PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

/// Container waiting reasons that fail an upgrade phase immediately.
pub const FAULTY_POD_REASONS: [&str; 3] = ["ImagePullBackOff", "ErrImagePull", "CrashLoopBackOff"];

/// Returns `true` when a container waiting reason marks the pod as faulty.
///
/// # Example
///
/// ```rust
/// use pravega_operator::status_reasons::is_faulty_waiting_reason;
///
/// assert!(is_faulty_waiting_reason("CrashLoopBackOff"));
/// assert!(!is_faulty_waiting_reason("ContainerCreating"));
/// ```
#[must_use]
pub fn is_faulty_waiting_reason(reason: &str) -> bool {
    FAULTY_POD_REASONS.contains(&reason)
}
