// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared fixtures for reconciler unit tests.

use crate::cluster_resources::STATEFULSET_POD_NAME_LABEL;
use crate::config::OperatorConfig;
use crate::context::Context;
use crate::crd::{Component, PravegaCluster, PravegaClusterSpec, PravegaSpec};
use crate::labels::{component_labels, VERSION_ANNOTATION};
use crate::metadata::{ClusterRef, MetadataCleanup};
use crate::store::{ClusterStore, MemoryStore};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodCondition, PodStatus,
};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const NAMESPACE: &str = "streaming";
pub const NAME: &str = "pravega";

/// Metadata cleanup that counts its calls and optionally fails.
#[derive(Default)]
pub struct RecordingCleanup {
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl RecordingCleanup {
    pub fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataCleanup for RecordingCleanup {
    async fn delete_all_metadata(&self, _cluster: &ClusterRef) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("zookeeper unreachable");
        }
        Ok(())
    }
}

pub type TestContext = Context<MemoryStore, RecordingCleanup>;

pub fn test_context() -> TestContext {
    Context::new(
        MemoryStore::new(),
        RecordingCleanup::default(),
        OperatorConfig::default(),
    )
}

/// A defaulted cluster with 1 controller and 2 segment stores at `version`.
pub fn test_cluster(version: &str) -> PravegaCluster {
    let mut cluster = PravegaCluster::new(
        NAME,
        PravegaClusterSpec {
            version: version.to_string(),
            pravega: PravegaSpec {
                controller_replicas: 1,
                segment_store_replicas: 2,
                ..PravegaSpec::default()
            },
            ..PravegaClusterSpec::default()
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.with_defaults(&OperatorConfig::default());
    cluster
}

/// Store `cluster` and return the stored copy, which carries a UID.
pub async fn seed_cluster(ctx: &TestContext, cluster: &PravegaCluster) -> PravegaCluster {
    ctx.store.create(cluster).await.unwrap()
}

/// A pod of `component` at `version`.
pub fn test_pod(name: &str, component: Component, version: &str, ready: bool) -> Pod {
    let mut labels = component_labels(NAME, component.label());
    labels.insert(STATEFULSET_POD_NAME_LABEL.to_string(), name.to_string());
    let mut annotations = BTreeMap::new();
    annotations.insert(VERSION_ANNOTATION.to_string(), version.to_string());

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        spec: None,
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..PodCondition::default()
            }]),
            ..PodStatus::default()
        }),
    }
}

/// A pod whose container is waiting with `reason`.
pub fn waiting_pod(name: &str, component: Component, version: &str, reason: &str) -> Pod {
    let mut pod = test_pod(name, component, version, false);
    if let Some(status) = pod.status.as_mut() {
        status.container_statuses = Some(vec![ContainerStatus {
            name: component.label().to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: None,
                }),
                ..ContainerState::default()
            }),
            ..ContainerStatus::default()
        }]);
    }
    pod
}
