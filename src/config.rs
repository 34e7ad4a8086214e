// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator-wide configuration.
//!
//! Every knob that shapes defaulting or reconcile policy lives in [`OperatorConfig`],
//! which is parsed once at startup (flags or environment variables) and then handed
//! to `with_defaults` and each reconcile step through the shared context.
//!
//! # Example
//!
//! ```rust
//! use pravega_operator::config::OperatorConfig;
//!
//! let config = OperatorConfig {
//!     test_mode: true,
//!     ..OperatorConfig::default()
//! };
//! assert_eq!(config.requeue_interval().as_secs(), 30);
//! ```

use crate::constants::{
    DEFAULT_CLEANUP_MAX_ATTEMPTS, DEFAULT_POD_READY_TIMEOUT_MINS, DEFAULT_REQUEUE_INTERVAL_SECS,
    DEFAULT_TERMINATION_POLL_SECS, DEFAULT_UPGRADE_TIMEOUT_MINS, METRICS_SERVER_PORT,
};
use clap::Parser;
use std::time::Duration;

/// Runtime configuration of the operator process.
#[derive(Parser, Clone, Debug, PartialEq, Eq)]
#[command(
    name = "pravega-operator",
    version,
    about = "Kubernetes operator for Pravega streaming-storage clusters"
)]
pub struct OperatorConfig {
    /// Relax replica minimums so single-node test clusters can be created.
    #[arg(long, env = "PRAVEGA_OPERATOR_TEST_MODE")]
    pub test_mode: bool,

    /// Do not add the metadata-cleanup finalizer to clusters.
    #[arg(long, env = "PRAVEGA_OPERATOR_DISABLE_FINALIZER")]
    pub disable_finalizer: bool,

    /// Steady-state requeue interval in seconds.
    #[arg(
        long = "requeue-interval",
        env = "PRAVEGA_OPERATOR_REQUEUE_INTERVAL",
        default_value_t = DEFAULT_REQUEUE_INTERVAL_SECS,
    )]
    pub requeue_interval_secs: u64,

    /// Minutes an upgrade phase may go without progress before it is failed.
    #[arg(
        long = "upgrade-timeout",
        env = "PRAVEGA_OPERATOR_UPGRADE_TIMEOUT",
        default_value_t = DEFAULT_UPGRADE_TIMEOUT_MINS,
    )]
    pub upgrade_timeout_mins: u64,

    /// Minutes to wait for a restarted pod's replacement to become ready.
    #[arg(
        long = "pod-ready-timeout",
        env = "PRAVEGA_OPERATOR_POD_READY_TIMEOUT",
        default_value_t = DEFAULT_POD_READY_TIMEOUT_MINS,
    )]
    pub pod_ready_timeout_mins: u64,

    /// Failed metadata cleanups tolerated before the finalizer is released anyway.
    #[arg(
        long,
        env = "PRAVEGA_OPERATOR_CLEANUP_MAX_ATTEMPTS",
        default_value_t = DEFAULT_CLEANUP_MAX_ATTEMPTS,
    )]
    pub cleanup_max_attempts: u32,

    /// Seconds between checks while waiting for cluster pods to terminate.
    #[arg(
        long = "termination-poll",
        env = "PRAVEGA_OPERATOR_TERMINATION_POLL",
        default_value_t = DEFAULT_TERMINATION_POLL_SECS,
    )]
    pub termination_poll_secs: u64,

    /// Never fill in a filesystem long-term-storage backend when none is set.
    #[arg(long, env = "PRAVEGA_OPERATOR_NO_DEFAULT_LTS")]
    pub no_default_long_term_storage: bool,

    /// Port serving `/metrics`, `/healthz` and `/readyz`.
    #[arg(long, env = "PRAVEGA_OPERATOR_METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    pub metrics_port: u16,

    /// Only watch clusters in this namespace.
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            test_mode: false,
            disable_finalizer: false,
            requeue_interval_secs: DEFAULT_REQUEUE_INTERVAL_SECS,
            upgrade_timeout_mins: DEFAULT_UPGRADE_TIMEOUT_MINS,
            pod_ready_timeout_mins: DEFAULT_POD_READY_TIMEOUT_MINS,
            cleanup_max_attempts: DEFAULT_CLEANUP_MAX_ATTEMPTS,
            termination_poll_secs: DEFAULT_TERMINATION_POLL_SECS,
            no_default_long_term_storage: false,
            metrics_port: METRICS_SERVER_PORT,
            watch_namespace: None,
        }
    }
}

impl OperatorConfig {
    /// Delay before the next steady-state reconcile.
    #[must_use]
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    /// No-progress window for an upgrade or rollback phase.
    #[must_use]
    pub fn upgrade_timeout(&self) -> chrono::Duration {
        minutes(self.upgrade_timeout_mins)
    }

    /// Replacement wait for a single pod during a rolling restart.
    #[must_use]
    pub fn pod_ready_timeout(&self) -> chrono::Duration {
        minutes(self.pod_ready_timeout_mins)
    }

    /// Requeue delay while deleted workloads drain.
    #[must_use]
    pub fn termination_poll(&self) -> Duration {
        Duration::from_secs(self.termination_poll_secs)
    }

    /// Whether defaulting may select a filesystem long-term-storage backend.
    #[must_use]
    pub fn default_long_term_storage(&self) -> bool {
        !self.no_default_long_term_storage
    }
}

// chrono panics past i64::MAX milliseconds
const MAX_MINUTES: i64 = i64::MAX / 60_000;

fn minutes(value: u64) -> chrono::Duration {
    chrono::Duration::minutes(i64::try_from(value).map_or(MAX_MINUTES, |m| m.min(MAX_MINUTES)))
}
