// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! State machine for cluster version transitions.
//!
//! The cluster's lifecycle state is persisted as conditions (`Upgrading`,
//! `Rollback`, `Error`) so that dashboards and `kubectl` keep reading the same wire
//! format. Internally it is handled as the tagged [`ClusterState`]:
//!
//! ```text
//! Stable --VersionChanged--> Upgrading(phase)
//! Upgrading --PhaseCompleted--> Upgrading(next phase)
//! Upgrading --AllPhasesCompleted--> Stable
//! Upgrading --PhaseFailed--> Failed(UpgradeFailed)
//! Failed(UpgradeFailed) --RollbackRequested--> RollingBack(phase)
//! Failed --VersionChanged--> Upgrading(first phase)
//! RollingBack --RollbackCompleted--> Stable
//! RollingBack --RollbackFailed--> Failed(RollbackFailed)
//! ```
//!
//! [`ClusterState::from_status`] reads the state back from the conditions and
//! [`ClusterState::project`] writes it onto them.

use crate::crd::{Component, PravegaCluster, PravegaClusterStatus};
use crate::reconcilers::status::find_condition;
use crate::status_reasons::{
    CONDITION_TYPE_ERROR, CONDITION_TYPE_ROLLBACK, CONDITION_TYPE_UPGRADING,
    REASON_ROLLBACK_FAILED, REASON_UPGRADE_FAILED, STATUS_FALSE, STATUS_TRUE,
};
use std::fmt;

// ============================================================================
// Phases
// ============================================================================

/// Components an upgrade walks through, in order.
///
/// The bookkeeper phase only exists when the cluster manages its own bookies.
#[must_use]
pub fn upgrade_phases(cluster: &PravegaCluster) -> Vec<Component> {
    Component::UPGRADE_ORDER
        .into_iter()
        .filter(|c| *c != Component::Bookkeeper || cluster.spec.bookkeeper.is_some())
        .collect()
}

/// Components a rollback walks through: the upgrade order reversed.
#[must_use]
pub fn rollback_phases(cluster: &PravegaCluster) -> Vec<Component> {
    let mut phases = upgrade_phases(cluster);
    phases.reverse();
    phases
}

// ============================================================================
// Cluster State
// ============================================================================

/// Which transition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Upgrade,
    Rollback,
}

impl FailureKind {
    /// Reason recorded on the `Error` condition.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            FailureKind::Upgrade => REASON_UPGRADE_FAILED,
            FailureKind::Rollback => REASON_ROLLBACK_FAILED,
        }
    }
}

/// Discriminant of [`ClusterState`], used as the transition table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Stable,
    Upgrading,
    Failed,
    RollingBack,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Stable => write!(f, "Stable"),
            StateKind::Upgrading => write!(f, "Upgrading"),
            StateKind::Failed => write!(f, "Failed"),
            StateKind::RollingBack => write!(f, "RollingBack"),
        }
    }
}

/// Version lifecycle state of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    /// Every component runs `currentVersion`.
    Stable,

    /// Components are being moved to `targetVersion`, one phase at a time.
    Upgrading { phase: Component },

    /// An upgrade or rollback failed. `Upgrading` stays `True` after a failed
    /// upgrade so the rollback check on the next pass can see it.
    Failed { kind: FailureKind, message: String },

    /// Components are being moved back to `targetVersion` in reverse order.
    RollingBack { phase: Component },
}

impl ClusterState {
    /// Read the state from the condition set.
    ///
    /// `Rollback` wins over `Error`, which wins over `Upgrading`. A missing or
    /// unrecognized phase reason resumes at the first phase.
    #[must_use]
    pub fn from_status(cluster: &PravegaCluster, status: &PravegaClusterStatus) -> Self {
        let phase_of = |condition_type: &str, phases: Vec<Component>| {
            find_condition(&status.conditions, condition_type)
                .and_then(|c| c.reason.as_deref())
                .and_then(Component::from_progress_reason)
                .filter(|c| phases.contains(c))
                .or_else(|| phases.first().copied())
                .unwrap_or(Component::Controller)
        };

        if status.is_rolling_back() {
            return ClusterState::RollingBack {
                phase: phase_of(CONDITION_TYPE_ROLLBACK, rollback_phases(cluster)),
            };
        }

        if status.has_error() {
            let error = find_condition(&status.conditions, CONDITION_TYPE_ERROR);
            let kind = if status.has_rollback_failed() {
                FailureKind::Rollback
            } else {
                FailureKind::Upgrade
            };
            return ClusterState::Failed {
                kind,
                message: error
                    .and_then(|c| c.message.clone())
                    .unwrap_or_default(),
            };
        }

        if status.is_upgrading() {
            return ClusterState::Upgrading {
                phase: phase_of(CONDITION_TYPE_UPGRADING, upgrade_phases(cluster)),
            };
        }

        ClusterState::Stable
    }

    #[must_use]
    pub fn kind(&self) -> StateKind {
        match self {
            ClusterState::Stable => StateKind::Stable,
            ClusterState::Upgrading { .. } => StateKind::Upgrading,
            ClusterState::Failed { .. } => StateKind::Failed,
            ClusterState::RollingBack { .. } => StateKind::RollingBack,
        }
    }

    #[must_use]
    pub fn is_stable(&self) -> bool {
        matches!(self, ClusterState::Stable)
    }

    /// Label value of the `cluster_state` gauge.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            ClusterState::Stable => "stable",
            ClusterState::Upgrading { .. } => "upgrading",
            ClusterState::Failed { .. } => "failed",
            ClusterState::RollingBack { .. } => "rolling_back",
        }
    }

    /// Write the state onto the condition set.
    ///
    /// `progress` becomes the message of the `Upgrading` or `Rollback` condition;
    /// the other states ignore it. Returns `true` if any condition changed.
    pub fn project(&self, status: &mut PravegaClusterStatus, progress: &str) -> bool {
        let mut changed = false;
        match self {
            ClusterState::Stable => {
                changed |= status.set_condition(CONDITION_TYPE_UPGRADING, STATUS_FALSE, "", "");
                if status.get_condition(CONDITION_TYPE_ROLLBACK).is_some() {
                    changed |=
                        status.set_condition(CONDITION_TYPE_ROLLBACK, STATUS_FALSE, "", "");
                }
                changed |= status.set_condition(CONDITION_TYPE_ERROR, STATUS_FALSE, "", "");
            }
            ClusterState::Upgrading { phase } => {
                changed |= status.set_condition(
                    CONDITION_TYPE_UPGRADING,
                    STATUS_TRUE,
                    phase.progress_reason(),
                    progress,
                );
                if status.get_condition(CONDITION_TYPE_ROLLBACK).is_some() {
                    changed |=
                        status.set_condition(CONDITION_TYPE_ROLLBACK, STATUS_FALSE, "", "");
                }
                changed |= status.set_condition(CONDITION_TYPE_ERROR, STATUS_FALSE, "", "");
            }
            ClusterState::Failed { kind, message } => {
                changed |=
                    status.set_condition(CONDITION_TYPE_ERROR, STATUS_TRUE, kind.reason(), message);
                if *kind == FailureKind::Rollback {
                    changed |=
                        status.set_condition(CONDITION_TYPE_ROLLBACK, STATUS_FALSE, "", "");
                    changed |=
                        status.set_condition(CONDITION_TYPE_UPGRADING, STATUS_FALSE, "", "");
                }
            }
            ClusterState::RollingBack { phase } => {
                changed |= status.set_condition(
                    CONDITION_TYPE_ROLLBACK,
                    STATUS_TRUE,
                    phase.progress_reason(),
                    progress,
                );
                changed |= status.set_condition(CONDITION_TYPE_UPGRADING, STATUS_FALSE, "", "");
            }
        }
        changed
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Stable => write!(f, "Stable"),
            ClusterState::Upgrading { phase } => write!(f, "Upgrading({phase})"),
            ClusterState::Failed { kind, .. } => write!(f, "Failed({})", kind.reason()),
            ClusterState::RollingBack { phase } => write!(f, "RollingBack({phase})"),
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Events that move a cluster between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeEvent {
    /// The requested version differs from the running one.
    VersionChanged,

    /// The requested version changed while an upgrade was in flight.
    Retargeted,

    /// The active phase's workload is fully ready at the target version.
    PhaseCompleted,

    /// The last phase completed.
    AllPhasesCompleted,

    /// A phase failed or made no progress in time.
    PhaseFailed,

    /// The user asked for the version the cluster ran before a failed upgrade.
    RollbackRequested,

    /// The last rollback phase completed.
    RollbackCompleted,

    /// A rollback phase failed or made no progress in time.
    RollbackFailed,
}

impl fmt::Display for UpgradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeEvent::VersionChanged => write!(f, "VersionChanged"),
            UpgradeEvent::Retargeted => write!(f, "Retargeted"),
            UpgradeEvent::PhaseCompleted => write!(f, "PhaseCompleted"),
            UpgradeEvent::AllPhasesCompleted => write!(f, "AllPhasesCompleted"),
            UpgradeEvent::PhaseFailed => write!(f, "PhaseFailed"),
            UpgradeEvent::RollbackRequested => write!(f, "RollbackRequested"),
            UpgradeEvent::RollbackCompleted => write!(f, "RollbackCompleted"),
            UpgradeEvent::RollbackFailed => write!(f, "RollbackFailed"),
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// A single allowed state transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: StateKind,
    pub to: StateKind,
    pub event: UpgradeEvent,
    pub description: &'static str,
}

/// Table of the transitions a cluster may take.
#[derive(Debug, Clone)]
pub struct ClusterStateMachine {
    transitions: Vec<Transition>,
}

impl Default for ClusterStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterStateMachine {
    #[must_use]
    pub fn new() -> Self {
        let transitions = vec![
            // From Stable
            Transition {
                from: StateKind::Stable,
                to: StateKind::Upgrading,
                event: UpgradeEvent::VersionChanged,
                description: "Requested version differs from the running version, start upgrade",
            },
            // From Upgrading
            Transition {
                from: StateKind::Upgrading,
                to: StateKind::Upgrading,
                event: UpgradeEvent::PhaseCompleted,
                description: "Phase complete, advance to the next component",
            },
            Transition {
                from: StateKind::Upgrading,
                to: StateKind::Upgrading,
                event: UpgradeEvent::Retargeted,
                description: "Requested version changed mid-upgrade, restart at the first phase",
            },
            Transition {
                from: StateKind::Upgrading,
                to: StateKind::Stable,
                event: UpgradeEvent::AllPhasesCompleted,
                description: "All components run the target version",
            },
            Transition {
                from: StateKind::Upgrading,
                to: StateKind::Failed,
                event: UpgradeEvent::PhaseFailed,
                description: "Upgrade phase failed",
            },
            // From Failed
            Transition {
                from: StateKind::Failed,
                to: StateKind::RollingBack,
                event: UpgradeEvent::RollbackRequested,
                description: "Previous version requested after a failed upgrade, start rollback",
            },
            Transition {
                from: StateKind::Failed,
                to: StateKind::Upgrading,
                event: UpgradeEvent::VersionChanged,
                description: "New version requested after a failure, start upgrade",
            },
            // From RollingBack
            Transition {
                from: StateKind::RollingBack,
                to: StateKind::RollingBack,
                event: UpgradeEvent::PhaseCompleted,
                description: "Rollback phase complete, advance to the next component",
            },
            Transition {
                from: StateKind::RollingBack,
                to: StateKind::Stable,
                event: UpgradeEvent::RollbackCompleted,
                description: "All components are back on the previous version",
            },
            Transition {
                from: StateKind::RollingBack,
                to: StateKind::Failed,
                event: UpgradeEvent::RollbackFailed,
                description: "Rollback phase failed",
            },
        ];

        Self { transitions }
    }

    /// Look up the transition `event` triggers from `from`, if it is allowed.
    #[must_use]
    pub fn transition(&self, from: StateKind, event: UpgradeEvent) -> Option<Transition> {
        self.transitions
            .iter()
            .find(|t| t.from == from && t.event == event)
            .cloned()
    }

    /// Check if a state transition is valid. Staying put is always valid.
    #[must_use]
    pub fn can_transition(&self, from: StateKind, to: StateKind) -> bool {
        from == to || self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// States reachable in one step from `from`.
    #[must_use]
    pub fn valid_transitions(&self, from: StateKind) -> Vec<StateKind> {
        let mut states: Vec<StateKind> = Vec::new();
        for t in self.transitions.iter().filter(|t| t.from == from) {
            if !states.contains(&t.to) {
                states.push(t.to);
            }
        }
        states
    }
}

/// Decide which version event, if any, the requested version raises in `state`.
///
/// Phase events are raised by the phase executors; this only covers changes of the
/// requested version:
///
/// - `Stable`: a version different from `currentVersion` starts an upgrade, but only
///   while `PodsReady` is `True`
/// - `Upgrading`: a version different from `targetVersion` retargets it
/// - `Failed` after an upgrade: the rollback candidate starts a rollback, a version
///   never seen before starts a new upgrade, anything else is ignored
/// - `Failed` after a rollback: a version different from `currentVersion` starts an
///   upgrade
/// - `RollingBack`: the rollback runs to the end
#[must_use]
pub fn determine_version_event(
    state: &ClusterState,
    spec_version: &str,
    status: &PravegaClusterStatus,
) -> Option<UpgradeEvent> {
    let current = status.current_version.as_deref()?;
    match state {
        ClusterState::Stable => (spec_version != current && status.is_pods_ready())
            .then_some(UpgradeEvent::VersionChanged),
        ClusterState::Upgrading { .. } => (status.target_version.as_deref() != Some(spec_version))
            .then_some(UpgradeEvent::Retargeted),
        ClusterState::Failed {
            kind: FailureKind::Upgrade,
            ..
        } => {
            if status.is_rollback_triggered(spec_version) {
                Some(UpgradeEvent::RollbackRequested)
            } else if !status.version_history.iter().any(|v| v == spec_version) {
                Some(UpgradeEvent::VersionChanged)
            } else {
                None
            }
        }
        ClusterState::Failed {
            kind: FailureKind::Rollback,
            ..
        } => (spec_version != current).then_some(UpgradeEvent::VersionChanged),
        ClusterState::RollingBack { .. } => None,
    }
}
