// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definition for Pravega clusters.
//!
//! A single namespaced `PravegaCluster` object describes a whole streaming-storage
//! cluster: the controller tier, the segment store tier, and optionally a managed
//! bookkeeper tier. The operator expands it into deployments, statefulsets,
//! services, config maps and pod disruption budgets.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: pravega.pravega.io/v1beta1
//! kind: PravegaCluster
//! metadata:
//!   name: pravega
//!   namespace: streaming
//! spec:
//!   version: 0.11.0
//!   zookeeperUri: zookeeper-client:2181
//!   pravega:
//!     controllerReplicas: 2
//!     segmentStoreReplicas: 4
//!     longTermStorage:
//!       filesystem:
//!         persistentVolumeClaim:
//!           claimName: pravega-tier2
//! ```
//!
//! # Defaulting
//!
//! [`PravegaCluster::with_defaults`] fills every field the reconcilers rely on and
//! reports whether anything changed. It is idempotent: a second call on the result
//! reports no change.

use crate::config::OperatorConfig;
use crate::constants::{
    CONTROLLER_CPU_LIMIT, CONTROLLER_CPU_REQUEST, CONTROLLER_GRPC_PORT, CONTROLLER_MEMORY_LIMIT,
    CONTROLLER_MEMORY_REQUEST, DATA_TIER_CPU_LIMIT, DATA_TIER_CPU_REQUEST, DATA_TIER_MEMORY_LIMIT,
    DATA_TIER_MEMORY_REQUEST, DEFAULT_BOOKIE_VOLUME_SIZE, DEFAULT_BOOKKEEPER_IMAGE,
    DEFAULT_BOOKKEEPER_URI, DEFAULT_CACHE_VOLUME_SIZE, DEFAULT_LTS_CLAIM_NAME,
    DEFAULT_PRAVEGA_IMAGE, DEFAULT_PRAVEGA_VERSION, DEFAULT_PULL_POLICY,
    DEFAULT_SEGMENT_STORE_STS_SUFFIX, DEFAULT_ZOOKEEPER_URI, MIN_BOOKKEEPER_REPLICAS,
    MIN_CONTROLLER_REPLICAS, MIN_SEGMENT_STORE_REPLICAS, BOOKIE_PORT,
    SEGMENT_STORE_LISTENER_PORT,
};
use crate::labels::{COMPONENT_BOOKIE, COMPONENT_CONTROLLER, COMPONENT_SEGMENT_STORE};
use crate::status_reasons::{
    REASON_UPDATING_BOOKKEEPER, REASON_UPDATING_CONTROLLER, REASON_UPDATING_SEGMENT_STORE,
};
use crate::version::uses_legacy_layout;
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaimSpec, ResourceRequirements, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// JVM option key for the segment store listener port
pub const LISTENER_PORT_OPTION: &str = "pravegaservice.service.listener.port";

/// `PravegaCluster` describes a Pravega streaming-storage cluster.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pravega.pravega.io",
    version = "v1beta1",
    kind = "PravegaCluster",
    namespaced,
    shortname = "pk",
    doc = "PravegaCluster manages a Pravega streaming-storage cluster: controllers, segment stores and an optional bookkeeper tier, including rolling upgrades and automatic rollback."
)]
#[kube(status = "PravegaClusterStatus")]
#[kube(
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.currentVersion"}"#,
    printcolumn = r#"{"name":"Desired Members","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready Members","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PravegaClusterSpec {
    /// Pravega version to run (e.g. "0.11.0").
    ///
    /// Changing this value starts a rolling upgrade. Setting it back to the version the
    /// cluster ran before a failed upgrade starts an automatic rollback.
    #[serde(default)]
    pub version: String,

    /// ZooKeeper connection string ("host:port").
    #[serde(default)]
    pub zookeeper_uri: String,

    /// Comma-separated bookie endpoints used when no managed bookkeeper tier is requested.
    #[serde(default)]
    pub bookkeeper_uri: String,

    /// External access policy for controller and segment store services.
    #[serde(default)]
    pub external_access: ExternalAccess,

    /// TLS policy.
    #[serde(default)]
    pub tls: TlsPolicy,

    /// Authentication policy.
    #[serde(default)]
    pub authentication: AuthenticationParameters,

    /// Controller and segment store configuration.
    #[serde(default)]
    pub pravega: PravegaSpec,

    /// Managed bookkeeper tier. When absent, `bookkeeperUri` points at an external ensemble.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookkeeper: Option<BookkeeperSpec>,
}

/// External access configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAccess {
    /// Expose the controller and every segment store replica outside the cluster.
    #[serde(default)]
    pub enabled: bool,

    /// Service type used for external access ("LoadBalancer" or "NodePort").
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    /// Domain name published through the external-dns hostname annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
}

/// TLS configuration. Only user-provided (static) certificates are supported.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TlsPolicy {
    /// Secrets holding user-generated keys and certificates.
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_tls: Option<StaticTls>,
}

/// Names of the secrets mounted for TLS.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaticTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

impl TlsPolicy {
    /// Controller pods mount a TLS secret.
    #[must_use]
    pub fn controller_secret(&self) -> Option<&str> {
        self.static_tls
            .as_ref()
            .and_then(|s| s.controller_secret.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Segment store pods mount a TLS secret.
    #[must_use]
    pub fn segment_store_secret(&self) -> Option<&str> {
        self.static_tls
            .as_ref()
            .and_then(|s| s.segment_store_secret.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// A CA bundle secret is mounted into every Pravega pod.
    #[must_use]
    pub fn ca_bundle(&self) -> Option<&str> {
        self.static_tls
            .as_ref()
            .and_then(|s| s.ca_bundle.as_deref())
            .filter(|s| !s.is_empty())
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationParameters {
    /// Enable client authentication and authorization.
    #[serde(default)]
    pub enabled: bool,

    /// Secret holding the password auth handler's user database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_auth_secret: Option<String>,
}

/// Container image configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Image repository without tag. The tag is always the cluster version.
    #[serde(default)]
    pub repository: String,

    /// Image pull policy.
    #[serde(default)]
    pub pull_policy: String,
}

impl ImageSpec {
    /// Full image reference for `version`.
    #[must_use]
    pub fn image_for(&self, version: &str) -> String {
        format!("{}:{}", self.repository, version)
    }

    fn with_defaults(&mut self, repository: &str) -> bool {
        let mut changed = false;
        if self.repository.is_empty() {
            self.repository = repository.to_string();
            changed = true;
        }
        if self.pull_policy.is_empty() {
            self.pull_policy = DEFAULT_PULL_POLICY.to_string();
            changed = true;
        }
        changed
    }
}

/// Controller and segment store configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PravegaSpec {
    /// Number of controller replicas.
    #[serde(default)]
    pub controller_replicas: i32,

    /// Number of segment store replicas.
    #[serde(default)]
    pub segment_store_replicas: i32,

    /// Pravega image.
    #[serde(default)]
    pub image: ImageSpec,

    /// Free-form Pravega options, rendered as `-Dkey=value` JVM options.
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// Extra controller JVM options. Options with the same key override defaults.
    #[serde(default)]
    pub controller_jvm_options: Vec<String>,

    /// Extra segment store JVM options. Options with the same key override defaults.
    #[serde(default)]
    pub segment_store_jvm_options: Vec<String>,

    /// Long-term (tier 2) storage backend. Exactly one backend must be set.
    #[serde(default)]
    pub long_term_storage: LongTermStorageSpec,

    /// Controller container resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_resources: Option<ResourceRequirements>,

    /// Segment store container resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_resources: Option<ResourceRequirements>,

    /// Annotations added to the controller service.
    #[serde(default)]
    pub controller_service_annotations: BTreeMap<String, String>,

    /// Annotations added to every per-replica segment store service.
    #[serde(default)]
    pub segment_store_service_annotations: BTreeMap<String, String>,

    /// Service type of the externally reachable controller service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_external_service_type: Option<String>,

    /// Service type of the externally reachable segment store services.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_store_external_service_type: Option<String>,

    /// Suffix of the segment store statefulset name (versions >= 0.7.0).
    #[serde(default)]
    pub segment_store_sts_name_suffix: String,

    /// Cache volume claim for segment stores running the pre-0.7.0 layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_volume_claim_template: Option<PersistentVolumeClaimSpec>,

    /// Run Pravega with DEBUG logging.
    #[serde(default)]
    pub debug_logging: bool,
}

/// Long-term storage backends. Exactly one must be set.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LongTermStorageSpec {
    /// Filesystem (NFS) backend backed by a persistent volume claim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FileSystemSpec>,

    /// Object-store (ECS S3) backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecs: Option<EcsSpec>,

    /// Distributed filesystem (HDFS) backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdfs: Option<HdfsSpec>,
}

impl LongTermStorageSpec {
    /// Number of configured backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        usize::from(self.filesystem.is_some())
            + usize::from(self.ecs.is_some())
            + usize::from(self.hdfs.is_some())
    }
}

/// Filesystem backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemSpec {
    pub persistent_volume_claim: PersistentVolumeClaimRef,
}

/// Reference to an existing persistent volume claim.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistentVolumeClaimRef {
    pub claim_name: String,
    #[serde(default)]
    pub read_only: bool,
}

/// Object-store backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EcsSpec {
    pub uri: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    /// Secret holding `ACCESS_KEY_ID` and `SECRET_KEY`.
    pub credentials: String,
}

/// Distributed filesystem backend.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HdfsSpec {
    pub uri: String,
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub replication_factor: i32,
}

/// Managed bookkeeper tier.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BookkeeperSpec {
    /// Number of bookies.
    #[serde(default)]
    pub replicas: i32,

    /// Bookkeeper image. The tag follows the cluster version.
    #[serde(default)]
    pub image: ImageSpec,

    /// Extra bookie JVM options.
    #[serde(default)]
    pub jvm_options: Vec<String>,

    /// Free-form bookkeeper options, rendered as `BK_<key>` environment entries.
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// Size of the journal and ledger volumes.
    #[serde(default)]
    pub storage_size: String,

    /// Bookie container resources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Condition represents an observation of a cluster's current state.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: `PodsReady`, `Upgrading`, `Rollback` or `Error`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message. During a phase this is the number of pods still pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time any field of the condition was rewritten (RFC3339 format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Names of ready and unready cluster pods.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MembersStatus {
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub unready: Vec<String>,
}

/// Progress of a rolling restart of one component's pods.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RestartProgress {
    /// Component whose pods are being restarted.
    pub component: Component,

    /// Pods still to be restarted, in order.
    #[serde(default)]
    pub pending: Vec<String>,

    /// Pod deleted most recently whose replacement is awaited.
    #[serde(default)]
    pub current: Option<String>,

    /// UID of the deleted pod, used to recognize its replacement.
    #[serde(default)]
    pub current_uid: Option<String>,

    /// When the current pod was deleted (RFC3339 format).
    #[serde(default)]
    pub since: Option<String>,
}

/// `PravegaCluster` status.
///
/// Clearable fields (`targetVersion` and the restart entries) serialize as `null` when
/// unset so a merge patch of the status removes them.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PravegaClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Version every component currently runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<String>,

    /// Version an upgrade or rollback is driving towards.
    #[serde(default)]
    pub target_version: Option<String>,

    /// Versions the cluster was driven to, most recent first, without duplicates.
    #[serde(default)]
    pub version_history: Vec<String>,

    /// Desired number of members across all components.
    #[serde(default)]
    pub replicas: i32,

    /// Number of member pods observed.
    #[serde(default)]
    pub current_replicas: i32,

    /// Number of ready member pods.
    #[serde(default)]
    pub ready_replicas: i32,

    #[serde(default)]
    pub members: MembersStatus,

    /// Rolling restarts in flight, one per component at most.
    #[serde(default)]
    pub restarts: Vec<RestartProgress>,

    /// Failed metadata cleanup attempts while the cluster is being deleted.
    #[serde(default)]
    pub cleanup_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Independently versioned workloads of a cluster, in forward upgrade order.
#[derive(
    Clone, Copy, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "camelCase")]
pub enum Component {
    Bookkeeper,
    SegmentStore,
    Controller,
}

impl Component {
    /// Forward upgrade order.
    pub const UPGRADE_ORDER: [Component; 3] = [
        Component::Bookkeeper,
        Component::SegmentStore,
        Component::Controller,
    ];

    /// Value of the `component` label.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Component::Bookkeeper => COMPONENT_BOOKIE,
            Component::SegmentStore => COMPONENT_SEGMENT_STORE,
            Component::Controller => COMPONENT_CONTROLLER,
        }
    }

    /// Progress reason used while this component's phase runs.
    #[must_use]
    pub fn progress_reason(self) -> &'static str {
        match self {
            Component::Bookkeeper => REASON_UPDATING_BOOKKEEPER,
            Component::SegmentStore => REASON_UPDATING_SEGMENT_STORE,
            Component::Controller => REASON_UPDATING_CONTROLLER,
        }
    }

    /// Inverse of [`Component::progress_reason`].
    #[must_use]
    pub fn from_progress_reason(reason: &str) -> Option<Self> {
        Self::UPGRADE_ORDER
            .into_iter()
            .find(|c| c.progress_reason() == reason)
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Bookkeeper => write!(f, "bookkeeper"),
            Component::SegmentStore => write!(f, "segmentstore"),
            Component::Controller => write!(f, "controller"),
        }
    }
}

/// Fatal spec errors. The operator does not repair these; the user must fix the spec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no long-term storage backend is configured and no default applies")]
    MissingLongTermStorage,

    #[error("{0} long-term storage backends are configured; exactly one is allowed")]
    MultipleLongTermStorage(usize),

    #[error("{component} replicas must be at least {minimum}, got {actual}")]
    TooFewReplicas {
        component: Component,
        minimum: i32,
        actual: i32,
    },
}

// ============================================================================
// Defaulting and validation
// ============================================================================

impl PravegaCluster {
    /// Fill unset spec fields. Returns `true` when anything changed.
    pub fn with_defaults(&mut self, config: &OperatorConfig) -> bool {
        let name = self.name_any();
        let namespace = self.namespace().unwrap_or_default();
        self.spec.with_defaults(&name, &namespace, config)
    }

    /// Check the invariants defaulting cannot establish on its own.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the long-term storage selection is
    /// missing or ambiguous, or when replica minimums are violated outside test mode.
    pub fn validate(&self, config: &OperatorConfig) -> Result<(), ConfigurationError> {
        match self.spec.pravega.long_term_storage.backend_count() {
            0 => return Err(ConfigurationError::MissingLongTermStorage),
            1 => {}
            n => return Err(ConfigurationError::MultipleLongTermStorage(n)),
        }

        if config.test_mode {
            return Ok(());
        }

        let mut minimums = vec![
            (
                Component::Controller,
                MIN_CONTROLLER_REPLICAS,
                self.spec.pravega.controller_replicas,
            ),
            (
                Component::SegmentStore,
                MIN_SEGMENT_STORE_REPLICAS,
                self.spec.pravega.segment_store_replicas,
            ),
        ];
        if let Some(bookkeeper) = &self.spec.bookkeeper {
            minimums.push((Component::Bookkeeper, MIN_BOOKKEEPER_REPLICAS, bookkeeper.replicas));
        }

        for (component, minimum, actual) in minimums {
            if actual < minimum {
                return Err(ConfigurationError::TooFewReplicas {
                    component,
                    minimum,
                    actual,
                });
            }
        }
        Ok(())
    }
}

impl PravegaClusterSpec {
    fn with_defaults(&mut self, name: &str, namespace: &str, config: &OperatorConfig) -> bool {
        let mut changed = false;

        if self.version.is_empty() {
            self.version = DEFAULT_PRAVEGA_VERSION.to_string();
            changed = true;
        }

        if self.zookeeper_uri.is_empty() {
            self.zookeeper_uri = DEFAULT_ZOOKEEPER_URI.to_string();
            changed = true;
        }

        if self.bookkeeper_uri.is_empty() {
            self.bookkeeper_uri = match &self.bookkeeper {
                Some(bookkeeper) => managed_bookkeeper_uri(name, namespace, bookkeeper.replicas),
                None => DEFAULT_BOOKKEEPER_URI.to_string(),
            };
            changed = true;
        }

        if !self.external_access.enabled
            && (self.external_access.service_type.is_some()
                || self.external_access.domain_name.is_some())
        {
            self.external_access.service_type = None;
            self.external_access.domain_name = None;
            changed = true;
        }

        if self.pravega.with_defaults(&self.version, config) {
            changed = true;
        }

        if let Some(bookkeeper) = self.bookkeeper.as_mut() {
            if bookkeeper.with_defaults(config) {
                changed = true;
            }
        }

        changed
    }
}

impl PravegaSpec {
    fn with_defaults(&mut self, version: &str, config: &OperatorConfig) -> bool {
        let mut changed = false;

        if !config.test_mode && self.controller_replicas < MIN_CONTROLLER_REPLICAS {
            self.controller_replicas = MIN_CONTROLLER_REPLICAS;
            changed = true;
        }

        if !config.test_mode && self.segment_store_replicas < MIN_SEGMENT_STORE_REPLICAS {
            self.segment_store_replicas = MIN_SEGMENT_STORE_REPLICAS;
            changed = true;
        }

        if self.image.with_defaults(DEFAULT_PRAVEGA_IMAGE) {
            changed = true;
        }

        if !self.options.contains_key(LISTENER_PORT_OPTION) {
            self.options.insert(
                LISTENER_PORT_OPTION.to_string(),
                SEGMENT_STORE_LISTENER_PORT.to_string(),
            );
            changed = true;
        }

        if self.long_term_storage.backend_count() == 0 && config.default_long_term_storage() {
            self.long_term_storage.filesystem = Some(FileSystemSpec {
                persistent_volume_claim: PersistentVolumeClaimRef {
                    claim_name: DEFAULT_LTS_CLAIM_NAME.to_string(),
                    read_only: false,
                },
            });
            changed = true;
        }

        if self.controller_resources.is_none() {
            self.controller_resources = Some(resource_requirements(
                CONTROLLER_CPU_REQUEST,
                CONTROLLER_CPU_LIMIT,
                CONTROLLER_MEMORY_REQUEST,
                CONTROLLER_MEMORY_LIMIT,
            ));
            changed = true;
        }

        if self.segment_store_resources.is_none() {
            self.segment_store_resources = Some(data_tier_resources());
            changed = true;
        }

        if self.segment_store_sts_name_suffix.is_empty() {
            self.segment_store_sts_name_suffix = DEFAULT_SEGMENT_STORE_STS_SUFFIX.to_string();
            changed = true;
        }

        if uses_legacy_layout(version) && self.cache_volume_claim_template.is_none() {
            self.cache_volume_claim_template = Some(volume_claim_spec(DEFAULT_CACHE_VOLUME_SIZE));
            changed = true;
        }

        changed
    }

    /// Listener port the segment store advertises, from the options map.
    #[must_use]
    pub fn segment_store_listener_port(&self) -> i32 {
        self.options
            .get(LISTENER_PORT_OPTION)
            .and_then(|p| p.parse().ok())
            .unwrap_or(SEGMENT_STORE_LISTENER_PORT)
    }
}

impl BookkeeperSpec {
    fn with_defaults(&mut self, config: &OperatorConfig) -> bool {
        let mut changed = false;

        if !config.test_mode && self.replicas < MIN_BOOKKEEPER_REPLICAS {
            self.replicas = MIN_BOOKKEEPER_REPLICAS;
            changed = true;
        }

        if self.image.with_defaults(DEFAULT_BOOKKEEPER_IMAGE) {
            changed = true;
        }

        if self.storage_size.is_empty() {
            self.storage_size = DEFAULT_BOOKIE_VOLUME_SIZE.to_string();
            changed = true;
        }

        if self.resources.is_none() {
            self.resources = Some(data_tier_resources());
            changed = true;
        }

        changed
    }
}

fn managed_bookkeeper_uri(name: &str, namespace: &str, replicas: i32) -> String {
    let count = replicas.max(MIN_BOOKKEEPER_REPLICAS);
    (0..count)
        .map(|i| format!("{name}-bookie-{i}.{name}-bookie-headless.{namespace}:{BOOKIE_PORT}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn data_tier_resources() -> ResourceRequirements {
    resource_requirements(
        DATA_TIER_CPU_REQUEST,
        DATA_TIER_CPU_LIMIT,
        DATA_TIER_MEMORY_REQUEST,
        DATA_TIER_MEMORY_LIMIT,
    )
}

fn resource_requirements(
    cpu_request: &str,
    cpu_limit: &str,
    memory_request: &str,
    memory_limit: &str,
) -> ResourceRequirements {
    ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu_request.to_string())),
            ("memory".to_string(), Quantity(memory_request.to_string())),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu_limit.to_string())),
            ("memory".to_string(), Quantity(memory_limit.to_string())),
        ])),
        ..Default::default()
    }
}

/// Single-volume `ReadWriteOnce` claim spec of `size`.
#[must_use]
pub fn volume_claim_spec(size: &str) -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
        resources: Some(VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(size.to_string()),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Naming
// ============================================================================

impl PravegaCluster {
    /// Version the running workloads are expected at outside of an upgrade.
    #[must_use]
    pub fn effective_version(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| s.current_version.clone())
            .unwrap_or_else(|| self.spec.version.clone())
    }

    /// Name of the controller deployment, config map, service and PDB.
    #[must_use]
    pub fn controller_name(&self) -> String {
        format!("{}-pravega-controller", self.name_any())
    }

    /// Name of the segment store config map.
    #[must_use]
    pub fn segment_store_config_map_name(&self) -> String {
        format!("{}-pravega-segmentstore", self.name_any())
    }

    /// Name of the segment store PDB.
    #[must_use]
    pub fn segment_store_pdb_name(&self) -> String {
        format!("{}-segmentstore", self.name_any())
    }

    /// Name of the segment store statefulset for clusters running `version`.
    #[must_use]
    pub fn segment_store_sts_name(&self, version: &str) -> String {
        if uses_legacy_layout(version) {
            format!("{}-pravega-segmentstore", self.name_any())
        } else {
            format!(
                "{}-{}",
                self.name_any(),
                self.spec.pravega.segment_store_sts_name_suffix
            )
        }
    }

    /// Name of the segment store headless service.
    #[must_use]
    pub fn segment_store_headless_service_name(&self) -> String {
        format!(
            "{}-{}-headless",
            self.name_any(),
            self.spec.pravega.segment_store_sts_name_suffix
        )
    }

    /// Name of the bookie statefulset, config map and PDB.
    #[must_use]
    pub fn bookie_name(&self) -> String {
        format!("{}-bookie", self.name_any())
    }

    /// Name of the bookie headless service.
    #[must_use]
    pub fn bookie_headless_service_name(&self) -> String {
        format!("{}-bookie-headless", self.name_any())
    }

    /// In-cluster URL of the controller service.
    #[must_use]
    pub fn controller_service_url(&self) -> String {
        format!(
            "tcp://{}.{}:{CONTROLLER_GRPC_PORT}",
            self.controller_name(),
            self.namespace().unwrap_or_default()
        )
    }

    /// Desired replica count of `component`. A missing bookkeeper tier has none.
    #[must_use]
    pub fn desired_replicas(&self, component: Component) -> i32 {
        match component {
            Component::Bookkeeper => self.spec.bookkeeper.as_ref().map_or(0, |b| b.replicas),
            Component::SegmentStore => self.spec.pravega.segment_store_replicas,
            Component::Controller => self.spec.pravega.controller_replicas,
        }
    }

    /// Desired member count across all components.
    #[must_use]
    pub fn expected_members(&self) -> i32 {
        Component::UPGRADE_ORDER
            .into_iter()
            .map(|c| self.desired_replicas(c))
            .sum()
    }

    /// Container image of `component` at `version`.
    #[must_use]
    pub fn image_for(&self, component: Component, version: &str) -> String {
        match (component, &self.spec.bookkeeper) {
            (Component::Bookkeeper, Some(bookkeeper)) => bookkeeper.image.image_for(version),
            _ => self.spec.pravega.image.image_for(version),
        }
    }
}
