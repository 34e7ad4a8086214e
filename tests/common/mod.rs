// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common test utilities for scenario tests.
//!
//! [`Harness`] pairs the reconciler with a simulated kubelet over a [`MemoryStore`]:
//! after each reconcile pass the kubelet materializes the pods, claims and workload
//! status the real cluster would produce. Pods of a version marked broken crash-loop.

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, PersistentVolumeClaim, Pod,
    PodCondition, PodStatus, PodTemplateSpec,
};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use pravega_operator::cluster_resources::STATEFULSET_POD_NAME_LABEL;
use pravega_operator::config::OperatorConfig;
use pravega_operator::context::Context;
use pravega_operator::crd::{PravegaCluster, PravegaClusterSpec, PravegaClusterStatus, PravegaSpec};
use pravega_operator::labels::{TEMPLATE_HASH_ANNOTATION, VERSION_ANNOTATION};
use pravega_operator::metadata::{ClusterRef, MetadataCleanup};
use pravega_operator::reconcilers::{reconcile_pravegacluster, ReconcileOutcome};
use pravega_operator::store::{ClusterStore, MemoryStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

pub const NAMESPACE: &str = "streaming";
pub const NAME: &str = "pravega";

/// Annotation the simulated kubelet uses to remember which workload owns a pod.
const OWNER_ANNOTATION: &str = "test.pravega.io/owner";

/// Metadata cleanup that only counts its calls.
#[derive(Default)]
pub struct CountingCleanup {
    calls: AtomicUsize,
}

impl CountingCleanup {
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataCleanup for CountingCleanup {
    async fn delete_all_metadata(&self, _cluster: &ClusterRef) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A cluster spec with 1 controller and `segment_stores` segment stores at `version`.
pub fn cluster_spec(version: &str, segment_stores: i32) -> PravegaCluster {
    sized_cluster_spec(version, 1, segment_stores)
}

/// A cluster spec with `controllers` controllers and `segment_stores` segment stores.
pub fn sized_cluster_spec(version: &str, controllers: i32, segment_stores: i32) -> PravegaCluster {
    let mut cluster = PravegaCluster::new(
        NAME,
        PravegaClusterSpec {
            version: version.to_string(),
            pravega: PravegaSpec {
                controller_replicas: controllers,
                segment_store_replicas: segment_stores,
                ..PravegaSpec::default()
            },
            ..PravegaClusterSpec::default()
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster
}

pub struct Harness {
    pub ctx: Context<MemoryStore, CountingCleanup>,
    /// `(pod name prefix, version)` pairs whose pods crash-loop.
    broken: BTreeSet<(String, String)>,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self {
            ctx: Context::new(
                MemoryStore::new(),
                CountingCleanup::default(),
                OperatorConfig::default(),
            ),
            broken: BTreeSet::new(),
        }
    }

    /// Pods running `version` crash-loop from now on.
    pub fn break_version(&mut self, version: &str) {
        self.break_pods("", version);
    }

    /// Pods named `prefix*` running `version` crash-loop from now on.
    pub fn break_pods(&mut self, prefix: &str, version: &str) {
        self.broken.insert((prefix.to_string(), version.to_string()));
    }

    pub async fn create(&self, cluster: &PravegaCluster) {
        self.ctx.store.create(cluster).await.unwrap();
    }

    pub fn cluster(&self) -> Option<PravegaCluster> {
        self.ctx.store.snapshot(NAMESPACE, NAME)
    }

    pub fn status(&self) -> PravegaClusterStatus {
        self.cluster()
            .and_then(|c| c.status)
            .unwrap_or_default()
    }

    /// Edit the cluster spec as a user would.
    pub async fn edit(&self, edit: impl FnOnce(&mut PravegaClusterSpec)) {
        let mut cluster = self.cluster().unwrap();
        edit(&mut cluster.spec);
        self.ctx.store.update(&cluster).await.unwrap();
    }

    pub async fn delete(&self) {
        self.ctx
            .store
            .delete::<PravegaCluster>(NAMESPACE, NAME)
            .await
            .unwrap();
    }

    pub async fn reconcile(&self) -> anyhow::Result<ReconcileOutcome> {
        reconcile_pravegacluster(&self.ctx, NAMESPACE, NAME).await
    }

    /// One reconcile pass followed by one kubelet pass.
    pub async fn step(&self) -> anyhow::Result<ReconcileOutcome> {
        let outcome = self.reconcile().await;
        self.run_kubelet();
        outcome
    }

    /// Step until the cluster is stable at its spec version with every member ready.
    pub async fn converge(&self, max_steps: usize) {
        for _ in 0..max_steps {
            self.step().await.unwrap();
            let (Some(cluster), status) = (self.cluster(), self.status()) else {
                continue;
            };
            if status.is_pods_ready()
                && !status.is_upgrading()
                && !status.has_error()
                && status.current_version.as_deref() == Some(cluster.spec.version.as_str())
            {
                return;
            }
        }
        panic!("cluster did not converge: {:#?}", self.status());
    }

    pub fn pods(&self) -> Vec<Pod> {
        let mut pods = self.ctx.store.all::<Pod>(NAMESPACE);
        pods.sort_by_key(ResourceExt::name_any);
        pods
    }

    /// Names and versions of the pods whose name starts with `prefix`.
    pub fn pod_versions(&self, prefix: &str) -> Vec<(String, String)> {
        self.pods()
            .into_iter()
            .filter(|p| p.name_any().starts_with(prefix))
            .map(|p| {
                let version = p
                    .annotations()
                    .get(VERSION_ANNOTATION)
                    .cloned()
                    .unwrap_or_default();
                (p.name_any(), version)
            })
            .collect()
    }

    pub fn claim_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ctx
            .store
            .all::<PersistentVolumeClaim>(NAMESPACE)
            .iter()
            .map(ResourceExt::name_any)
            .collect();
        names.sort();
        names
    }

    // ========================================================================
    // Simulated kubelet
    // ========================================================================

    /// Bring pods, claims and workload status in line with the stored workloads.
    pub fn run_kubelet(&self) {
        let statefulsets = self.ctx.store.all::<StatefulSet>(NAMESPACE);
        let deployments = self.ctx.store.all::<Deployment>(NAMESPACE);

        let owners: BTreeSet<String> = statefulsets
            .iter()
            .map(|s| format!("StatefulSet/{}", s.name_any()))
            .chain(deployments.iter().map(|d| format!("Deployment/{}", d.name_any())))
            .collect();
        for pod in self.pods() {
            let owner = pod.annotations().get(OWNER_ANNOTATION).cloned();
            if owner.is_some_and(|o| !owners.contains(&o)) {
                self.ctx.store.remove::<Pod>(NAMESPACE, &pod.name_any());
            }
        }

        for sts in statefulsets {
            self.sync_statefulset(sts);
        }
        for deployment in deployments {
            self.sync_deployment(deployment);
        }
    }

    fn make_pod(&self, name: &str, owner: &str, template: &PodTemplateSpec) -> Pod {
        let template_meta = template.metadata.clone().unwrap_or_default();
        let mut annotations = template_meta.annotations.unwrap_or_default();
        annotations.insert(OWNER_ANNOTATION.to_string(), owner.to_string());
        let version = annotations.get(VERSION_ANNOTATION).cloned().unwrap_or_default();
        let broken = self
            .broken
            .iter()
            .any(|(prefix, v)| *v == version && name.starts_with(prefix.as_str()));

        let mut labels = template_meta.labels.unwrap_or_default();
        labels.insert(STATEFULSET_POD_NAME_LABEL.to_string(), name.to_string());

        let container_statuses = broken.then(|| {
            vec![ContainerStatus {
                name: "main".to_string(),
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("CrashLoopBackOff".to_string()),
                        message: None,
                    }),
                    ..ContainerState::default()
                }),
                ..ContainerStatus::default()
            }]
        });

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
                    status: if broken { "False" } else { "True" }.to_string(),
                    ..PodCondition::default()
                }]),
                container_statuses,
                ..PodStatus::default()
            }),
        }
    }

    fn is_ready(pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|c| c.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
    }

    fn owned_pods(&self, owner: &str) -> Vec<Pod> {
        self.pods()
            .into_iter()
            .filter(|p| p.annotations().get(OWNER_ANNOTATION).map(String::as_str) == Some(owner))
            .collect()
    }

    fn sync_statefulset(&self, mut sts: StatefulSet) {
        let name = sts.name_any();
        let owner = format!("StatefulSet/{name}");
        let Some(spec) = sts.spec.clone() else {
            return;
        };
        let replicas = spec.replicas.unwrap_or(1);

        for pod in self.owned_pods(&owner) {
            let ordinal = pod
                .name_any()
                .rsplit_once('-')
                .and_then(|(_, o)| o.parse::<i32>().ok());
            if ordinal.is_none_or(|o| o >= replicas) {
                self.ctx.store.remove::<Pod>(NAMESPACE, &pod.name_any());
            }
        }

        let claim_labels = spec.selector.match_labels.clone().unwrap_or_default();
        let mut ready = 0;
        for ordinal in 0..replicas {
            let pod_name = format!("{name}-{ordinal}");
            let pod = match self.ctx.store.snapshot::<Pod>(NAMESPACE, &pod_name) {
                Some(pod) => pod,
                None => {
                    let pod = self.make_pod(&pod_name, &owner, &spec.template);
                    self.ctx.store.put(&pod).unwrap()
                }
            };
            if Self::is_ready(&pod) {
                ready += 1;
            }

            for claim in spec.volume_claim_templates.iter().flatten() {
                let claim_name = format!("{}-{pod_name}", claim.name_any());
                if self
                    .ctx
                    .store
                    .snapshot::<PersistentVolumeClaim>(NAMESPACE, &claim_name)
                    .is_none()
                {
                    self.put_claim(&claim_name, &claim_labels);
                }
            }
        }

        sts.status = Some(StatefulSetStatus {
            observed_generation: sts.metadata.generation,
            replicas,
            ready_replicas: Some(ready),
            current_replicas: Some(replicas),
            updated_replicas: Some(replicas),
            ..StatefulSetStatus::default()
        });
        self.ctx.store.put(&sts).unwrap();
    }

    fn put_claim(&self, name: &str, labels: &BTreeMap<String, String>) {
        let claim = PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            ..PersistentVolumeClaim::default()
        };
        self.ctx.store.put(&claim).unwrap();
    }

    /// Replace every pod of an outdated template at once, then report the rollout.
    fn sync_deployment(&self, mut deployment: Deployment) {
        let name = deployment.name_any();
        let owner = format!("Deployment/{name}");
        let Some(spec) = deployment.spec.clone() else {
            return;
        };
        let replicas = spec.replicas.unwrap_or(1);
        let hash = deployment
            .annotations()
            .get(TEMPLATE_HASH_ANNOTATION)
            .map(|h| h.chars().take(8).collect::<String>())
            .unwrap_or_else(|| "template".to_string());
        let prefix = format!("{name}-{hash}-");

        for pod in self.owned_pods(&owner) {
            let current = pod
                .name_any()
                .strip_prefix(&prefix)
                .and_then(|o| o.parse::<i32>().ok())
                .is_some_and(|o| o < replicas);
            if !current {
                self.ctx.store.remove::<Pod>(NAMESPACE, &pod.name_any());
            }
        }

        let mut ready = 0;
        for ordinal in 0..replicas {
            let pod_name = format!("{prefix}{ordinal}");
            let pod = match self.ctx.store.snapshot::<Pod>(NAMESPACE, &pod_name) {
                Some(pod) => pod,
                None => {
                    let pod = self.make_pod(&pod_name, &owner, &spec.template);
                    self.ctx.store.put(&pod).unwrap()
                }
            };
            if Self::is_ready(&pod) {
                ready += 1;
            }
        }

        deployment.status = Some(DeploymentStatus {
            observed_generation: deployment.metadata.generation,
            replicas: Some(replicas),
            updated_replicas: Some(replicas),
            ready_replicas: Some(ready),
            available_replicas: Some(ready),
            ..DeploymentStatus::default()
        });
        self.ctx.store.put(&deployment).unwrap();
    }
}
