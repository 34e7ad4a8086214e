// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Pravega operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "pravega.pravega.io/v1beta1";

/// Kind name for `PravegaCluster` resource
pub const KIND_PRAVEGA_CLUSTER: &str = "PravegaCluster";

// ============================================================================
// Pravega Port Constants
// ============================================================================

/// Controller gRPC port
pub const CONTROLLER_GRPC_PORT: i32 = 9090;

/// Controller REST port
pub const CONTROLLER_REST_PORT: i32 = 10080;

/// Default segment store listener port
pub const SEGMENT_STORE_LISTENER_PORT: i32 = 12345;

/// Segment store admin/health port
pub const SEGMENT_STORE_ADMIN_PORT: i32 = 6061;

/// Bookie client port
pub const BOOKIE_PORT: i32 = 3181;

/// ZooKeeper client port used when the URI carries none
pub const ZOOKEEPER_CLIENT_PORT: i32 = 2181;

// ============================================================================
// Default Spec Values
// ============================================================================

/// Default Pravega version when none is requested
pub const DEFAULT_PRAVEGA_VERSION: &str = "0.11.0";

/// Default Pravega image repository
pub const DEFAULT_PRAVEGA_IMAGE: &str = "pravega/pravega";

/// Default bookkeeper image repository
pub const DEFAULT_BOOKKEEPER_IMAGE: &str = "pravega/bookkeeper";

/// Default image pull policy
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";

/// Default ZooKeeper connection string
pub const DEFAULT_ZOOKEEPER_URI: &str = "zookeeper-client:2181";

/// Default bookkeeper ensemble used when no managed bookkeeper tier is requested
pub const DEFAULT_BOOKKEEPER_URI: &str = "bookkeeper-bookie-0.bookkeeper-bookie-headless.default.svc.cluster.local:3181,bookkeeper-bookie-1.bookkeeper-bookie-headless.default.svc.cluster.local:3181,bookkeeper-bookie-2.bookkeeper-bookie-headless.default.svc.cluster.local:3181";

/// Default name suffix of the segment store statefulset and headless service (>= 0.7.0)
pub const DEFAULT_SEGMENT_STORE_STS_SUFFIX: &str = "pravega-segment-store";

/// Default claim used for filesystem long-term storage
pub const DEFAULT_LTS_CLAIM_NAME: &str = "pravega-tier2";

/// Default external service type when external access is enabled
pub const DEFAULT_EXTERNAL_SERVICE_TYPE: &str = "LoadBalancer";

/// Default cache volume size for legacy (< 0.7.0) segment stores
pub const DEFAULT_CACHE_VOLUME_SIZE: &str = "20Gi";

/// Default bookkeeper journal/ledger volume size
pub const DEFAULT_BOOKIE_VOLUME_SIZE: &str = "10Gi";

/// Token signing key used when authentication carries no dedicated secret
pub const DEFAULT_TOKEN_SIGNING_KEY: &str = "secret";

// ============================================================================
// Replica Count Constants
// ============================================================================

/// Minimum controller replicas outside test mode
pub const MIN_CONTROLLER_REPLICAS: i32 = 1;

/// Minimum segment store replicas outside test mode
pub const MIN_SEGMENT_STORE_REPLICAS: i32 = 1;

/// Minimum bookkeeper replicas outside test mode
pub const MIN_BOOKKEEPER_REPLICAS: i32 = 3;

/// `maxUnavailable` for every pod disruption budget
pub const PDB_MAX_UNAVAILABLE: i32 = 1;

// ============================================================================
// Default Resource Requirements
// ============================================================================

/// Controller CPU request
pub const CONTROLLER_CPU_REQUEST: &str = "250m";

/// Controller CPU limit
pub const CONTROLLER_CPU_LIMIT: &str = "500m";

/// Controller memory request
pub const CONTROLLER_MEMORY_REQUEST: &str = "512Mi";

/// Controller memory limit
pub const CONTROLLER_MEMORY_LIMIT: &str = "1Gi";

/// Segment store and bookie CPU request
pub const DATA_TIER_CPU_REQUEST: &str = "500m";

/// Segment store and bookie CPU limit
pub const DATA_TIER_CPU_LIMIT: &str = "1";

/// Segment store and bookie memory request
pub const DATA_TIER_MEMORY_REQUEST: &str = "1Gi";

/// Segment store and bookie memory limit
pub const DATA_TIER_MEMORY_LIMIT: &str = "2Gi";

// ============================================================================
// Version Boundary Constants
// ============================================================================

/// First version using the new segment store storage layout
pub const SEGMENT_STORE_LAYOUT_VERSION: &str = "0.7.0";

// ============================================================================
// Volume and Mount Constants
// ============================================================================

/// Cache volume name (legacy layout volume claim template name)
pub const CACHE_VOLUME_NAME: &str = "cache";

/// Cache mount point inside segment store pods
pub const CACHE_MOUNT_PATH: &str = "/tmp/pravega/cache";

/// Long-term storage volume name
pub const LTS_VOLUME_NAME: &str = "tier2";

/// Long-term storage mount point for filesystem backends
pub const LTS_MOUNT_PATH: &str = "/mnt/tier2";

/// TLS secret volume name
pub const TLS_VOLUME_NAME: &str = "tls-secret";

/// TLS secret mount directory
pub const TLS_MOUNT_PATH: &str = "/etc/secret-volume";

/// CA bundle volume name
pub const CA_BUNDLE_VOLUME_NAME: &str = "ca-bundle";

/// CA bundle mount directory
pub const CA_BUNDLE_MOUNT_PATH: &str = "/etc/secret-volume/ca-bundle";

/// Password auth secret volume name
pub const AUTH_VOLUME_NAME: &str = "auth-passwd-secret";

/// Password auth secret mount directory
pub const AUTH_MOUNT_PATH: &str = "/etc/auth-passwd-volume";

/// Bookie journal volume claim template name
pub const BOOKIE_JOURNAL_VOLUME_NAME: &str = "journal";

/// Bookie ledger volume claim template name
pub const BOOKIE_LEDGER_VOLUME_NAME: &str = "ledger";

// ============================================================================
// Kubernetes Health Check Constants
// ============================================================================

/// Readiness probe initial delay
pub const READINESS_INITIAL_DELAY_SECS: i32 = 20;

/// Readiness probe period
pub const READINESS_PERIOD_SECS: i32 = 10;

/// Liveness probe initial delay
pub const LIVENESS_INITIAL_DELAY_SECS: i32 = 60;

/// Liveness probe period
pub const LIVENESS_PERIOD_SECS: i32 = 15;

/// Liveness probe failure threshold
pub const LIVENESS_FAILURE_THRESHOLD: i32 = 4;

// ============================================================================
// Controller Timing Constants
// ============================================================================

/// Steady-state requeue interval (30 seconds)
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 30;

/// Requeue duration for controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Default upgrade no-progress and pods-ready timeout (minutes)
pub const DEFAULT_UPGRADE_TIMEOUT_MINS: u64 = 10;

/// Default per-pod replacement wait during rolling restarts (minutes)
pub const DEFAULT_POD_READY_TIMEOUT_MINS: u64 = 10;

/// Default number of metadata cleanup attempts before the finalizer is released
pub const DEFAULT_CLEANUP_MAX_ATTEMPTS: u32 = 3;

/// Default requeue delay while waiting for pods to terminate on deletion
pub const DEFAULT_TERMINATION_POLL_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
