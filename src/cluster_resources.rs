// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes resource builders for Pravega clusters.
//!
//! Every function here is a pure `make_*` builder: it reads a defaulted
//! [`PravegaCluster`] and returns the desired child object. Reconcilers diff the result
//! against what the cluster store holds and never inspect how it was built.
//!
//! Workload builders take the version explicitly because an upgrade builds the template
//! at the target version while the spec may already name another one.
//!
//! Each workload carries a hash of its pod template in the
//! [`TEMPLATE_HASH_ANNOTATION`] annotation, and each pod template carries a hash of its
//! config map in [`CONFIG_HASH_ANNOTATION`]. Comparing the stored hash with a freshly
//! built one is how drift is detected without field-by-field comparison against
//! server-defaulted objects.

use crate::constants::{
    API_GROUP_VERSION, AUTH_MOUNT_PATH, AUTH_VOLUME_NAME, BOOKIE_JOURNAL_VOLUME_NAME,
    BOOKIE_LEDGER_VOLUME_NAME, BOOKIE_PORT, CACHE_MOUNT_PATH, CACHE_VOLUME_NAME,
    CA_BUNDLE_MOUNT_PATH, CA_BUNDLE_VOLUME_NAME, CONTROLLER_GRPC_PORT, CONTROLLER_REST_PORT,
    DEFAULT_CACHE_VOLUME_SIZE, DEFAULT_EXTERNAL_SERVICE_TYPE, DEFAULT_TOKEN_SIGNING_KEY,
    KIND_PRAVEGA_CLUSTER, LIVENESS_FAILURE_THRESHOLD, LIVENESS_INITIAL_DELAY_SECS,
    LIVENESS_PERIOD_SECS, LTS_MOUNT_PATH, LTS_VOLUME_NAME, PDB_MAX_UNAVAILABLE,
    READINESS_INITIAL_DELAY_SECS, READINESS_PERIOD_SECS, SEGMENT_STORE_ADMIN_PORT,
    TLS_MOUNT_PATH, TLS_VOLUME_NAME,
};
use crate::crd::{volume_claim_spec, Component, PravegaCluster};
use crate::labels::{
    component_labels, object_labels, CONFIG_HASH_ANNOTATION, EXTERNAL_DNS_HOSTNAME_ANNOTATION,
    TEMPLATE_HASH_ANNOTATION, VERSION_ANNOTATION,
};
use crate::version::uses_legacy_layout;
use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvFromSource, EnvVar, EnvVarSource, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    Probe, SecretEnvSource, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

/// Label set by the statefulset controller on every pod it creates
pub const STATEFULSET_POD_NAME_LABEL: &str = "statefulset.kubernetes.io/pod-name";

const HEAP_DUMP_VOLUME_NAME: &str = "heap-dump";
const HEAP_DUMP_DIR: &str = "/tmp/dumpfile/heap";
const BOOKIE_JOURNAL_MOUNT_PATH: &str = "/bk/journal";
const BOOKIE_LEDGER_MOUNT_PATH: &str = "/bk/ledgers";

const CONTROLLER_DEFAULT_JVM_OPTIONS: [&str; 8] = [
    "-Xms512m",
    "-XX:+ExitOnOutOfMemoryError",
    "-XX:+CrashOnOutOfMemoryError",
    "-XX:+HeapDumpOnOutOfMemoryError",
    "-XX:HeapDumpPath=/tmp/dumpfile/heap",
    "-XX:+UnlockExperimentalVMOptions",
    "-XX:+UseContainerSupport",
    "-XX:MaxRAMPercentage=50.0",
];

const SEGMENT_STORE_DEFAULT_JVM_OPTIONS: [&str; 3] = [
    "-XX:+ExitOnOutOfMemoryError",
    "-XX:+CrashOnOutOfMemoryError",
    "-XX:+UseContainerSupport",
];

const BOOKIE_DEFAULT_JVM_OPTIONS: [&str; 6] = [
    "-Xms1g",
    "-XX:MaxDirectMemorySize=1g",
    "-XX:+UseG1GC",
    "-XX:MaxGCPauseMillis=10",
    "-XX:+ParallelRefProcEnabled",
    "-XX:+DisableExplicitGC",
];

// ============================================================================
// Ownership and hashing
// ============================================================================

/// Builds owner references for a resource owned by a `PravegaCluster`
///
/// Deleting the cluster deletes every object carrying this reference.
///
/// # Arguments
///
/// * `cluster` - The `PravegaCluster` that owns the resource
///
/// # Returns
///
/// A vector containing a single controller `OwnerReference`
#[must_use]
pub fn build_owner_references(cluster: &PravegaCluster) -> Vec<OwnerReference> {
    vec![OwnerReference {
        api_version: API_GROUP_VERSION.to_string(),
        kind: KIND_PRAVEGA_CLUSTER.to_string(),
        name: cluster.name_any(),
        uid: cluster.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }]
}

/// Hex-encoded SHA-256 of the JSON encoding of `value`.
#[must_use]
pub fn content_hash<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())
}

/// Template hash recorded on a workload, if any.
#[must_use]
pub fn template_hash_of(meta: &ObjectMeta) -> Option<&str> {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(TEMPLATE_HASH_ANNOTATION))
        .map(String::as_str)
}

fn child_meta(cluster: &PravegaCluster, name: &str, component: Component) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: cluster.namespace(),
        labels: Some(object_labels(&cluster.name_any(), component.label())),
        owner_references: Some(build_owner_references(cluster)),
        ..Default::default()
    }
}

fn selector(cluster: &PravegaCluster, component: Component) -> BTreeMap<String, String> {
    component_labels(&cluster.name_any(), component.label())
}

fn with_template_hash(mut meta: ObjectMeta, template: &PodTemplateSpec) -> ObjectMeta {
    meta.annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(TEMPLATE_HASH_ANNOTATION.to_string(), content_hash(template));
    meta
}

// ============================================================================
// JVM options
// ============================================================================

/// Key an option is deduplicated by: `-Xms`/`-Xmx`, the flag name of `-XX:` options,
/// and the property name of `-D` options.
fn jvm_option_key(option: &str) -> &str {
    for prefix in ["-Xms", "-Xmx", "-Xss"] {
        if option.starts_with(prefix) {
            return prefix;
        }
    }
    if let Some(rest) = option.strip_prefix("-XX:") {
        let rest = rest.strip_prefix(['+', '-']).unwrap_or(rest);
        return rest.split('=').next().unwrap_or(rest);
    }
    option.split('=').next().unwrap_or(option)
}

/// Merge user JVM options over defaults. A user option replaces a default with the
/// same key in place; new options are appended.
#[must_use]
pub fn merge_jvm_options(defaults: &[&str], custom: &[String]) -> Vec<String> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for option in defaults
        .iter()
        .map(|o| (*o).to_string())
        .chain(custom.iter().cloned())
    {
        let key = jvm_option_key(&option).to_string();
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = option,
            None => merged.push((key, option)),
        }
    }
    merged.into_iter().map(|(_, option)| option).collect()
}

/// Full `JAVA_OPTS` value: merged JVM options, the cluster name property and the
/// Pravega options map as `-Dk=v`, sorted.
fn java_opts(cluster: &PravegaCluster, defaults: &[&str], custom: &[String]) -> String {
    let mut opts = merge_jvm_options(defaults, custom);
    opts.push(format!("-Dpravegaservice.clusterName={}", cluster.name_any()));
    opts.extend(
        cluster
            .spec
            .pravega
            .options
            .iter()
            .map(|(k, v)| format!("-D{k}={v}")),
    );
    opts.sort();
    opts.dedup();
    opts.join(" ")
}

// ============================================================================
// Config maps
// ============================================================================

/// Controller config map, consumed through `envFrom`.
#[must_use]
pub fn make_controller_config_map(cluster: &PravegaCluster) -> ConfigMap {
    let spec = &cluster.spec;
    let mut data = BTreeMap::from([
        ("CLUSTER_NAME".to_string(), cluster.name_any()),
        ("ZK_URL".to_string(), spec.zookeeper_uri.clone()),
        (
            "JAVA_OPTS".to_string(),
            java_opts(
                cluster,
                &CONTROLLER_DEFAULT_JVM_OPTIONS,
                &spec.pravega.controller_jvm_options,
            ),
        ),
        ("REST_SERVER_PORT".to_string(), CONTROLLER_REST_PORT.to_string()),
        (
            "CONTROLLER_SERVER_PORT".to_string(),
            CONTROLLER_GRPC_PORT.to_string(),
        ),
        (
            "AUTHORIZATION_ENABLED".to_string(),
            spec.authentication.enabled.to_string(),
        ),
        (
            "TOKEN_SIGNING_KEY".to_string(),
            DEFAULT_TOKEN_SIGNING_KEY.to_string(),
        ),
        (
            "TLS_ENABLED".to_string(),
            spec.tls.controller_secret().is_some().to_string(),
        ),
        ("WAIT_FOR".to_string(), spec.zookeeper_uri.clone()),
    ]);
    if spec.pravega.debug_logging {
        data.insert("log.level".to_string(), "DEBUG".to_string());
    }

    ConfigMap {
        metadata: child_meta(cluster, &cluster.controller_name(), Component::Controller),
        data: Some(data),
        ..Default::default()
    }
}

/// Segment store config map, including the long-term storage selection.
#[must_use]
pub fn make_segment_store_config_map(cluster: &PravegaCluster) -> ConfigMap {
    let spec = &cluster.spec;
    let mut data = BTreeMap::from([
        ("CLUSTER_NAME".to_string(), cluster.name_any()),
        ("ZK_URL".to_string(), spec.zookeeper_uri.clone()),
        (
            "JAVA_OPTS".to_string(),
            java_opts(
                cluster,
                &SEGMENT_STORE_DEFAULT_JVM_OPTIONS,
                &spec.pravega.segment_store_jvm_options,
            ),
        ),
        ("CONTROLLER_URL".to_string(), cluster.controller_service_url()),
        (
            "AUTHORIZATION_ENABLED".to_string(),
            spec.authentication.enabled.to_string(),
        ),
        (
            "TLS_ENABLED".to_string(),
            spec.tls.segment_store_secret().is_some().to_string(),
        ),
        ("WAIT_FOR".to_string(), spec.bookkeeper_uri.clone()),
    ]);
    if spec.external_access.enabled {
        data.insert("K8_EXTERNAL_ACCESS".to_string(), "true".to_string());
    }
    if spec.pravega.debug_logging {
        data.insert("log.level".to_string(), "DEBUG".to_string());
    }
    data.extend(long_term_storage_options(cluster));

    ConfigMap {
        metadata: child_meta(
            cluster,
            &cluster.segment_store_config_map_name(),
            Component::SegmentStore,
        ),
        data: Some(data),
        ..Default::default()
    }
}

fn long_term_storage_options(cluster: &PravegaCluster) -> BTreeMap<String, String> {
    let lts = &cluster.spec.pravega.long_term_storage;
    let mut options = BTreeMap::new();
    if lts.filesystem.is_some() {
        options.insert("TIER2_STORAGE".to_string(), "FILESYSTEM".to_string());
        options.insert("NFS_MOUNT".to_string(), LTS_MOUNT_PATH.to_string());
    } else if let Some(ecs) = &lts.ecs {
        options.insert("TIER2_STORAGE".to_string(), "EXTENDEDS3".to_string());
        options.insert("EXTENDEDS3_CONFIGURI".to_string(), ecs.uri.clone());
        options.insert("EXTENDEDS3_BUCKET".to_string(), ecs.bucket.clone());
        options.insert("EXTENDEDS3_PREFIX".to_string(), ecs.prefix.clone());
    } else if let Some(hdfs) = &lts.hdfs {
        options.insert("TIER2_STORAGE".to_string(), "HDFS".to_string());
        options.insert("HDFS_URL".to_string(), hdfs.uri.clone());
        options.insert("HDFS_ROOT".to_string(), hdfs.root.clone());
        if hdfs.replication_factor > 0 {
            options.insert(
                "HDFS_REPLICATION".to_string(),
                hdfs.replication_factor.to_string(),
            );
        }
    }
    options
}

/// Bookie config map. `None` when the cluster has no managed bookkeeper tier.
#[must_use]
pub fn make_bookie_config_map(cluster: &PravegaCluster) -> Option<ConfigMap> {
    let bookkeeper = cluster.spec.bookkeeper.as_ref()?;
    let extra_opts = merge_jvm_options(&BOOKIE_DEFAULT_JVM_OPTIONS, &bookkeeper.jvm_options);

    let mut data = BTreeMap::from([
        ("BK_BOOKIE_EXTRA_OPTS".to_string(), extra_opts.join(" ")),
        ("ZK_URL".to_string(), cluster.spec.zookeeper_uri.clone()),
        ("BK_useHostNameAsBookieID".to_string(), "false".to_string()),
        ("PRAVEGA_CLUSTER_NAME".to_string(), cluster.name_any()),
        ("WAIT_FOR".to_string(), cluster.spec.zookeeper_uri.clone()),
    ]);
    data.extend(
        bookkeeper
            .options
            .iter()
            .map(|(k, v)| (format!("BK_{k}"), v.clone())),
    );

    Some(ConfigMap {
        metadata: child_meta(cluster, &cluster.bookie_name(), Component::Bookkeeper),
        data: Some(data),
        ..Default::default()
    })
}

/// Desired config map of `component`.
#[must_use]
pub fn make_config_map(cluster: &PravegaCluster, component: Component) -> Option<ConfigMap> {
    match component {
        Component::Bookkeeper => make_bookie_config_map(cluster),
        Component::SegmentStore => Some(make_segment_store_config_map(cluster)),
        Component::Controller => Some(make_controller_config_map(cluster)),
    }
}

// ============================================================================
// Services
// ============================================================================

fn external_service_type(cluster: &PravegaCluster, component_override: Option<&String>) -> String {
    component_override
        .or(cluster.spec.external_access.service_type.as_ref())
        .cloned()
        .unwrap_or_else(|| DEFAULT_EXTERNAL_SERVICE_TYPE.to_string())
}

/// Controller service. `ClusterIP` unless external access is enabled.
#[must_use]
pub fn make_controller_service(cluster: &PravegaCluster) -> Service {
    let external = cluster.spec.external_access.enabled;
    let (service_type, annotations) = if external {
        (
            external_service_type(
                cluster,
                cluster.spec.pravega.controller_external_service_type.as_ref(),
            ),
            cluster.spec.pravega.controller_service_annotations.clone(),
        )
    } else {
        ("ClusterIP".to_string(), BTreeMap::new())
    };

    let mut metadata = child_meta(cluster, &cluster.controller_name(), Component::Controller);
    metadata.annotations = Some(annotations);

    Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some(service_type),
            selector: Some(selector(cluster, Component::Controller)),
            ports: Some(vec![
                ServicePort {
                    name: Some("rest".to_string()),
                    port: CONTROLLER_REST_PORT,
                    ..Default::default()
                },
                ServicePort {
                    name: Some("grpc".to_string()),
                    port: CONTROLLER_GRPC_PORT,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Headless service giving segment store pods stable DNS names.
#[must_use]
pub fn make_segment_store_headless_service(cluster: &PravegaCluster) -> Service {
    Service {
        metadata: child_meta(
            cluster,
            &cluster.segment_store_headless_service_name(),
            Component::SegmentStore,
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector(cluster, Component::SegmentStore)),
            ports: Some(vec![ServicePort {
                name: Some("server".to_string()),
                port: cluster.spec.pravega.segment_store_listener_port(),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// External DNS hostname for a per-replica service, if a domain is configured.
fn external_dns_hostname(domain: Option<&str>, service_name: &str) -> Option<String> {
    let domain = domain.map(str::trim).filter(|d| !d.is_empty())?;
    if domain.ends_with('.') {
        Some(format!("{service_name}.{domain}"))
    } else {
        Some(format!("{service_name}.{domain}."))
    }
}

/// One externally reachable service per segment store replica, selecting the pod of
/// the same ordinal in the statefulset used at `version`. Empty unless external access
/// is enabled.
#[must_use]
pub fn make_segment_store_external_services(
    cluster: &PravegaCluster,
    version: &str,
) -> Vec<Service> {
    if !cluster.spec.external_access.enabled {
        return Vec::new();
    }

    let sts_name = cluster.segment_store_sts_name(version);
    let port = cluster.spec.pravega.segment_store_listener_port();
    let service_type = external_service_type(
        cluster,
        cluster.spec.pravega.segment_store_external_service_type.as_ref(),
    );

    (0..cluster.spec.pravega.segment_store_replicas)
        .map(|ordinal| {
            let name = format!("{sts_name}-{ordinal}");
            let mut annotations = cluster.spec.pravega.segment_store_service_annotations.clone();
            if let Some(hostname) = external_dns_hostname(
                cluster.spec.external_access.domain_name.as_deref(),
                &name,
            ) {
                annotations.insert(EXTERNAL_DNS_HOSTNAME_ANNOTATION.to_string(), hostname);
            }

            let mut metadata = child_meta(cluster, &name, Component::SegmentStore);
            metadata.annotations = Some(annotations);

            Service {
                metadata,
                spec: Some(ServiceSpec {
                    type_: Some(service_type.clone()),
                    external_traffic_policy: Some("Local".to_string()),
                    selector: Some(BTreeMap::from([(
                        STATEFULSET_POD_NAME_LABEL.to_string(),
                        name.clone(),
                    )])),
                    ports: Some(vec![ServicePort {
                        name: Some("server".to_string()),
                        port,
                        protocol: Some("TCP".to_string()),
                        target_port: Some(IntOrString::Int(port)),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }
        })
        .collect()
}

/// Headless service for the bookie statefulset.
#[must_use]
pub fn make_bookie_headless_service(cluster: &PravegaCluster) -> Option<Service> {
    cluster.spec.bookkeeper.as_ref()?;
    Some(Service {
        metadata: child_meta(
            cluster,
            &cluster.bookie_headless_service_name(),
            Component::Bookkeeper,
        ),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector(cluster, Component::Bookkeeper)),
            ports: Some(vec![ServicePort {
                name: Some("bookie".to_string()),
                port: BOOKIE_PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

// ============================================================================
// Pod disruption budgets
// ============================================================================

fn make_pdb(cluster: &PravegaCluster, name: &str, component: Component) -> PodDisruptionBudget {
    PodDisruptionBudget {
        metadata: child_meta(cluster, name, component),
        spec: Some(PodDisruptionBudgetSpec {
            max_unavailable: Some(IntOrString::Int(PDB_MAX_UNAVAILABLE)),
            selector: Some(LabelSelector {
                match_labels: Some(selector(cluster, component)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Desired PDB of `component`. `None` for a bookkeeper tier that is not managed.
#[must_use]
pub fn make_pdb_for(cluster: &PravegaCluster, component: Component) -> Option<PodDisruptionBudget> {
    match component {
        Component::Bookkeeper => {
            cluster.spec.bookkeeper.as_ref()?;
            Some(make_pdb(cluster, &cluster.bookie_name(), component))
        }
        Component::SegmentStore => Some(make_pdb(
            cluster,
            &cluster.segment_store_pdb_name(),
            component,
        )),
        Component::Controller => Some(make_pdb(cluster, &cluster.controller_name(), component)),
    }
}

// ============================================================================
// Pod templates
// ============================================================================

fn tcp_probe(port: i32, initial_delay: i32, period: i32, failure_threshold: Option<i32>) -> Probe {
    Probe {
        tcp_socket: Some(TCPSocketAction {
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        failure_threshold,
        ..Default::default()
    }
}

fn config_map_env(name: String) -> EnvFromSource {
    EnvFromSource {
        config_map_ref: Some(ConfigMapEnvSource {
            name,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn secret_volume(
    volumes: &mut Vec<Volume>,
    mounts: &mut Vec<VolumeMount>,
    volume: &str,
    secret: &str,
    mount_path: &str,
) {
    volumes.push(Volume {
        name: volume.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    });
    mounts.push(VolumeMount {
        name: volume.to_string(),
        mount_path: mount_path.to_string(),
        ..Default::default()
    });
}

fn pod_env() -> Vec<EnvVar> {
    [("POD_NAME", "metadata.name"), ("POD_NAMESPACE", "metadata.namespace")]
        .into_iter()
        .map(|(name, path)| EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: path.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect()
}

fn pod_template(
    cluster: &PravegaCluster,
    component: Component,
    version: &str,
    config_map: Option<&ConfigMap>,
    spec: PodSpec,
) -> PodTemplateSpec {
    let mut annotations = BTreeMap::from([(VERSION_ANNOTATION.to_string(), version.to_string())]);
    if let Some(config_map) = config_map {
        annotations.insert(
            CONFIG_HASH_ANNOTATION.to_string(),
            content_hash(&config_map.data),
        );
    }
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(selector(cluster, component)),
            annotations: Some(annotations),
            ..Default::default()
        }),
        spec: Some(spec),
    }
}

fn controller_pod_spec(cluster: &PravegaCluster, version: &str) -> PodSpec {
    let spec = &cluster.spec;
    let mut volumes = vec![Volume {
        name: HEAP_DUMP_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: HEAP_DUMP_VOLUME_NAME.to_string(),
        mount_path: HEAP_DUMP_DIR.to_string(),
        ..Default::default()
    }];

    if let Some(secret) = spec.tls.controller_secret() {
        secret_volume(&mut volumes, &mut mounts, TLS_VOLUME_NAME, secret, TLS_MOUNT_PATH);
    }
    if let Some(ca_bundle) = spec.tls.ca_bundle() {
        secret_volume(
            &mut volumes,
            &mut mounts,
            CA_BUNDLE_VOLUME_NAME,
            ca_bundle,
            CA_BUNDLE_MOUNT_PATH,
        );
    }
    if let Some(secret) = password_auth_secret(cluster) {
        secret_volume(&mut volumes, &mut mounts, AUTH_VOLUME_NAME, secret, AUTH_MOUNT_PATH);
    }

    PodSpec {
        containers: vec![Container {
            name: Component::Controller.label().to_string(),
            image: Some(cluster.image_for(Component::Controller, version)),
            image_pull_policy: Some(spec.pravega.image.pull_policy.clone()),
            args: Some(vec!["controller".to_string()]),
            ports: Some(vec![
                ContainerPort {
                    name: Some("rest".to_string()),
                    container_port: CONTROLLER_REST_PORT,
                    ..Default::default()
                },
                ContainerPort {
                    name: Some("grpc".to_string()),
                    container_port: CONTROLLER_GRPC_PORT,
                    ..Default::default()
                },
            ]),
            env_from: Some(vec![config_map_env(cluster.controller_name())]),
            volume_mounts: Some(mounts),
            resources: spec.pravega.controller_resources.clone(),
            readiness_probe: Some(tcp_probe(
                CONTROLLER_REST_PORT,
                READINESS_INITIAL_DELAY_SECS,
                READINESS_PERIOD_SECS,
                None,
            )),
            liveness_probe: Some(tcp_probe(
                CONTROLLER_GRPC_PORT,
                LIVENESS_INITIAL_DELAY_SECS,
                LIVENESS_PERIOD_SECS,
                Some(LIVENESS_FAILURE_THRESHOLD),
            )),
            ..Default::default()
        }],
        volumes: Some(volumes),
        ..Default::default()
    }
}

fn password_auth_secret(cluster: &PravegaCluster) -> Option<&str> {
    let auth = &cluster.spec.authentication;
    auth.password_auth_secret
        .as_deref()
        .filter(|s| auth.enabled && !s.is_empty())
}

fn segment_store_pod_spec(cluster: &PravegaCluster, version: &str) -> PodSpec {
    let spec = &cluster.spec;
    let port = spec.pravega.segment_store_listener_port();
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    let mut env_from = vec![config_map_env(cluster.segment_store_config_map_name())];

    if uses_legacy_layout(version) {
        mounts.push(VolumeMount {
            name: CACHE_VOLUME_NAME.to_string(),
            mount_path: CACHE_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }

    let lts = &spec.pravega.long_term_storage;
    if let Some(filesystem) = &lts.filesystem {
        volumes.push(Volume {
            name: LTS_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: filesystem.persistent_volume_claim.claim_name.clone(),
                read_only: Some(filesystem.persistent_volume_claim.read_only),
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: LTS_VOLUME_NAME.to_string(),
            mount_path: LTS_MOUNT_PATH.to_string(),
            ..Default::default()
        });
    }
    if let Some(ecs) = &lts.ecs {
        env_from.push(EnvFromSource {
            prefix: Some("EXTENDEDS3_".to_string()),
            secret_ref: Some(SecretEnvSource {
                name: ecs.credentials.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if let Some(secret) = spec.tls.segment_store_secret() {
        secret_volume(&mut volumes, &mut mounts, TLS_VOLUME_NAME, secret, TLS_MOUNT_PATH);
    }
    if let Some(ca_bundle) = spec.tls.ca_bundle() {
        secret_volume(
            &mut volumes,
            &mut mounts,
            CA_BUNDLE_VOLUME_NAME,
            ca_bundle,
            CA_BUNDLE_MOUNT_PATH,
        );
    }

    PodSpec {
        containers: vec![Container {
            name: Component::SegmentStore.label().to_string(),
            image: Some(cluster.image_for(Component::SegmentStore, version)),
            image_pull_policy: Some(spec.pravega.image.pull_policy.clone()),
            args: Some(vec!["segmentstore".to_string()]),
            ports: Some(vec![
                ContainerPort {
                    name: Some("server".to_string()),
                    container_port: port,
                    ..Default::default()
                },
                ContainerPort {
                    name: Some("admin".to_string()),
                    container_port: SEGMENT_STORE_ADMIN_PORT,
                    ..Default::default()
                },
            ]),
            env_from: Some(env_from),
            env: Some(pod_env()),
            volume_mounts: Some(mounts),
            resources: spec.pravega.segment_store_resources.clone(),
            readiness_probe: Some(tcp_probe(
                port,
                READINESS_INITIAL_DELAY_SECS,
                READINESS_PERIOD_SECS,
                None,
            )),
            liveness_probe: Some(tcp_probe(
                SEGMENT_STORE_ADMIN_PORT,
                LIVENESS_INITIAL_DELAY_SECS,
                LIVENESS_PERIOD_SECS,
                Some(LIVENESS_FAILURE_THRESHOLD),
            )),
            ..Default::default()
        }],
        volumes: Some(volumes),
        ..Default::default()
    }
}

fn bookie_pod_spec(cluster: &PravegaCluster, version: &str) -> PodSpec {
    let bookkeeper = cluster.spec.bookkeeper.clone().unwrap_or_default();
    PodSpec {
        containers: vec![Container {
            name: Component::Bookkeeper.label().to_string(),
            image: Some(cluster.image_for(Component::Bookkeeper, version)),
            image_pull_policy: Some(bookkeeper.image.pull_policy.clone()),
            ports: Some(vec![ContainerPort {
                name: Some("bookie".to_string()),
                container_port: BOOKIE_PORT,
                ..Default::default()
            }]),
            env_from: Some(vec![config_map_env(cluster.bookie_name())]),
            env: Some(pod_env()),
            volume_mounts: Some(vec![
                VolumeMount {
                    name: BOOKIE_JOURNAL_VOLUME_NAME.to_string(),
                    mount_path: BOOKIE_JOURNAL_MOUNT_PATH.to_string(),
                    ..Default::default()
                },
                VolumeMount {
                    name: BOOKIE_LEDGER_VOLUME_NAME.to_string(),
                    mount_path: BOOKIE_LEDGER_MOUNT_PATH.to_string(),
                    ..Default::default()
                },
            ]),
            resources: bookkeeper.resources.clone(),
            readiness_probe: Some(tcp_probe(
                BOOKIE_PORT,
                READINESS_INITIAL_DELAY_SECS,
                READINESS_PERIOD_SECS,
                None,
            )),
            liveness_probe: Some(tcp_probe(
                BOOKIE_PORT,
                LIVENESS_INITIAL_DELAY_SECS,
                LIVENESS_PERIOD_SECS,
                Some(LIVENESS_FAILURE_THRESHOLD),
            )),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn claim_template(name: &str, spec: PersistentVolumeClaimSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(spec),
        ..Default::default()
    }
}

// ============================================================================
// Workloads
// ============================================================================

/// Controller deployment at `version`.
#[must_use]
pub fn make_controller_deployment(cluster: &PravegaCluster, version: &str) -> Deployment {
    let name = cluster.controller_name();
    debug!(
        name = %name,
        version = %version,
        replicas = cluster.spec.pravega.controller_replicas,
        "Building controller Deployment"
    );

    let config_map = make_controller_config_map(cluster);
    let template = pod_template(
        cluster,
        Component::Controller,
        version,
        Some(&config_map),
        controller_pod_spec(cluster, version),
    );

    Deployment {
        metadata: with_template_hash(child_meta(cluster, &name, Component::Controller), &template),
        spec: Some(DeploymentSpec {
            replicas: Some(cluster.spec.pravega.controller_replicas),
            progress_deadline_seconds: Some(600),
            revision_history_limit: Some(0),
            selector: LabelSelector {
                match_labels: Some(selector(cluster, Component::Controller)),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Segment store statefulset at `version`. The name and the cache volume depend on
/// which side of the storage-layout boundary `version` is.
#[must_use]
pub fn make_segment_store_statefulset(cluster: &PravegaCluster, version: &str) -> StatefulSet {
    let name = cluster.segment_store_sts_name(version);
    debug!(
        name = %name,
        version = %version,
        replicas = cluster.spec.pravega.segment_store_replicas,
        "Building segment store StatefulSet"
    );

    let config_map = make_segment_store_config_map(cluster);
    let template = pod_template(
        cluster,
        Component::SegmentStore,
        version,
        Some(&config_map),
        segment_store_pod_spec(cluster, version),
    );

    let volume_claim_templates = if uses_legacy_layout(version) {
        let spec = cluster
            .spec
            .pravega
            .cache_volume_claim_template
            .clone()
            .unwrap_or_else(|| volume_claim_spec(DEFAULT_CACHE_VOLUME_SIZE));
        Some(vec![claim_template(CACHE_VOLUME_NAME, spec)])
    } else {
        None
    };

    StatefulSet {
        metadata: with_template_hash(
            child_meta(cluster, &name, Component::SegmentStore),
            &template,
        ),
        spec: Some(StatefulSetSpec {
            service_name: Some(cluster.segment_store_headless_service_name()),
            replicas: Some(cluster.spec.pravega.segment_store_replicas),
            pod_management_policy: Some("OrderedReady".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(selector(cluster, Component::SegmentStore)),
                ..Default::default()
            },
            template,
            volume_claim_templates,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Bookie statefulset at `version`. `None` without a managed bookkeeper tier.
#[must_use]
pub fn make_bookie_statefulset(cluster: &PravegaCluster, version: &str) -> Option<StatefulSet> {
    let bookkeeper = cluster.spec.bookkeeper.as_ref()?;
    let name = cluster.bookie_name();
    debug!(
        name = %name,
        version = %version,
        replicas = bookkeeper.replicas,
        "Building bookie StatefulSet"
    );

    let config_map = make_bookie_config_map(cluster);
    let template = pod_template(
        cluster,
        Component::Bookkeeper,
        version,
        config_map.as_ref(),
        bookie_pod_spec(cluster, version),
    );

    Some(StatefulSet {
        metadata: with_template_hash(
            child_meta(cluster, &name, Component::Bookkeeper),
            &template,
        ),
        spec: Some(StatefulSetSpec {
            service_name: Some(cluster.bookie_headless_service_name()),
            replicas: Some(bookkeeper.replicas),
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("OnDelete".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(selector(cluster, Component::Bookkeeper)),
                ..Default::default()
            },
            template,
            volume_claim_templates: Some(vec![
                claim_template(
                    BOOKIE_JOURNAL_VOLUME_NAME,
                    volume_claim_spec(&bookkeeper.storage_size),
                ),
                claim_template(
                    BOOKIE_LEDGER_VOLUME_NAME,
                    volume_claim_spec(&bookkeeper.storage_size),
                ),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
