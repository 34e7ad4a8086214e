// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `upgrade.rs`

#[cfg(test)]
mod tests {
    use crate::cluster_resources::{
        make_controller_deployment, make_segment_store_statefulset, template_hash_of,
    };
    use crate::crd::{Component, PravegaCluster, PravegaClusterStatus};
    use crate::labels::component_labels;
    use crate::reconcilers::test_helpers::{
        test_cluster, test_context, test_pod, waiting_pod, TestContext, NAME, NAMESPACE,
    };
    use crate::reconcilers::upgrade::sync_cluster_version;
    use crate::reconcilers::upgrade_state_machine::{ClusterState, FailureKind};
    use crate::status_reasons::{
        CONDITION_TYPE_ERROR, CONDITION_TYPE_PODS_READY, CONDITION_TYPE_UPGRADING,
        REASON_UPDATING_CONTROLLER, REASON_UPDATING_SEGMENT_STORE, REASON_UPGRADE_FAILED,
        STATUS_FALSE, STATUS_TRUE,
    };
    use chrono::{Duration, Utc};
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus, StatefulSet, StatefulSetStatus};
    use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
    use kube::api::ObjectMeta;
    use kube::ResourceExt;

    const OLD: &str = "0.12.0";
    const NEW: &str = "0.13.0";
    const SS_0: &str = "pravega-pravega-segment-store-0";
    const SS_1: &str = "pravega-pravega-segment-store-1";

    fn stable_status(version: &str) -> PravegaClusterStatus {
        let mut status = PravegaClusterStatus::default();
        status.init();
        status.current_version = Some(version.to_string());
        status.version_history = vec![version.to_string()];
        status.set_condition(CONDITION_TYPE_PODS_READY, STATUS_TRUE, "", "");
        status
    }

    /// A cluster running `OLD` with every workload ready.
    fn running_cluster(ctx: &TestContext) -> PravegaCluster {
        let cluster = test_cluster(OLD);

        let mut sts = make_segment_store_statefulset(&cluster, OLD);
        sts.status = Some(StatefulSetStatus {
            replicas: 2,
            ready_replicas: Some(2),
            ..StatefulSetStatus::default()
        });
        ctx.store.put(&sts).unwrap();
        for name in [SS_0, SS_1] {
            ctx.store
                .put(&test_pod(name, Component::SegmentStore, OLD, true))
                .unwrap();
        }

        ctx.store
            .put(&make_controller_deployment(&cluster, OLD))
            .unwrap();
        mark_deployment_ready(ctx, &cluster);
        cluster
    }

    /// Report the controller rollout as finished, as the deployment controller would.
    fn mark_deployment_ready(ctx: &TestContext, cluster: &PravegaCluster) {
        let mut deployment: Deployment = ctx
            .store
            .snapshot(NAMESPACE, &cluster.controller_name())
            .unwrap();
        deployment.status = Some(DeploymentStatus {
            observed_generation: deployment.metadata.generation,
            replicas: Some(1),
            updated_replicas: Some(1),
            ready_replicas: Some(1),
            available_replicas: Some(1),
            ..DeploymentStatus::default()
        });
        ctx.store.put(&deployment).unwrap();
    }

    fn controller_hash(ctx: &TestContext, cluster: &PravegaCluster) -> Option<String> {
        let deployment: Deployment = ctx
            .store
            .snapshot(NAMESPACE, &cluster.controller_name())
            .unwrap();
        template_hash_of(&deployment.metadata).map(str::to_string)
    }

    async fn tick(
        ctx: &TestContext,
        cluster: &PravegaCluster,
        status: &mut PravegaClusterStatus,
    ) -> ClusterState {
        let state = ClusterState::from_status(cluster, status);
        sync_cluster_version(ctx, cluster, status, state)
            .await
            .unwrap()
    }

    fn condition_reason(status: &PravegaClusterStatus, condition_type: &str) -> Option<String> {
        status
            .get_condition(condition_type)
            .and_then(|(_, c)| c.reason.clone())
    }

    #[tokio::test]
    async fn test_stable_cluster_is_left_alone() {
        let ctx = test_context();
        let cluster = running_cluster(&ctx);
        let mut status = stable_status(OLD);

        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(state, ClusterState::Stable);
        assert_eq!(ctx.store.mutation_count(), 0);
        assert!(!status.is_upgrading());
    }

    #[tokio::test]
    async fn test_upgrade_does_not_start_with_unready_pods() {
        let ctx = test_context();
        let mut cluster = running_cluster(&ctx);
        let mut status = stable_status(OLD);
        status.set_condition(CONDITION_TYPE_PODS_READY, STATUS_FALSE, "", "");
        cluster.spec.version = NEW.to_string();

        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(state, ClusterState::Stable);
        assert!(!status.is_upgrading());
        assert_eq!(status.target_version, None);
        assert_eq!(status.current_version.as_deref(), Some(OLD));
        assert_eq!(ctx.store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_full_upgrade_walks_segment_store_then_controller() {
        let ctx = test_context();
        let mut cluster = running_cluster(&ctx);
        let old_controller = controller_hash(&ctx, &cluster);
        let mut status = stable_status(OLD);
        cluster.spec.version = NEW.to_string();

        // Upgrade starts with the segment store: one pod replaced, controller untouched.
        let state = tick(&ctx, &cluster, &mut status).await;
        assert_eq!(
            state,
            ClusterState::Upgrading {
                phase: Component::SegmentStore
            }
        );
        assert_eq!(status.target_version.as_deref(), Some(NEW));
        assert_eq!(status.version_history, vec![NEW.to_string(), OLD.to_string()]);
        assert!(status.is_upgrading());
        assert_eq!(
            condition_reason(&status, CONDITION_TYPE_UPGRADING).as_deref(),
            Some(REASON_UPDATING_SEGMENT_STORE)
        );
        assert!(ctx.store.snapshot::<Pod>(NAMESPACE, SS_0).is_none());
        assert!(ctx.store.snapshot::<Pod>(NAMESPACE, SS_1).is_some());
        assert_eq!(controller_hash(&ctx, &cluster), old_controller);

        // The replacement has not appeared yet: nothing else is deleted.
        tick(&ctx, &cluster, &mut status).await;
        assert!(ctx.store.snapshot::<Pod>(NAMESPACE, SS_1).is_some());

        ctx.store
            .put(&test_pod(SS_0, Component::SegmentStore, NEW, true))
            .unwrap();
        tick(&ctx, &cluster, &mut status).await;
        assert!(ctx.store.snapshot::<Pod>(NAMESPACE, SS_1).is_none());
        assert_eq!(controller_hash(&ctx, &cluster), old_controller);

        // Segment store done: the controller template switches in the same pass.
        ctx.store
            .put(&test_pod(SS_1, Component::SegmentStore, NEW, true))
            .unwrap();
        let state = tick(&ctx, &cluster, &mut status).await;
        assert_eq!(
            state,
            ClusterState::Upgrading {
                phase: Component::Controller
            }
        );
        assert_eq!(
            condition_reason(&status, CONDITION_TYPE_UPGRADING).as_deref(),
            Some(REASON_UPDATING_CONTROLLER)
        );
        assert_ne!(controller_hash(&ctx, &cluster), old_controller);

        mark_deployment_ready(&ctx, &cluster);
        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(state, ClusterState::Stable);
        assert_eq!(status.current_version.as_deref(), Some(NEW));
        assert!(status.target_version.is_none());
        assert_eq!(status.version_history, vec![NEW.to_string(), OLD.to_string()]);
        assert!(!status.is_upgrading());
        assert!(!status.has_error());
    }

    #[tokio::test]
    async fn test_crash_looping_pod_fails_upgrade_and_rollback_recovers() {
        let ctx = test_context();
        let mut cluster = running_cluster(&ctx);
        let mut status = stable_status(OLD);
        cluster.spec.version = NEW.to_string();

        tick(&ctx, &cluster, &mut status).await;
        ctx.store
            .put(&waiting_pod(SS_0, Component::SegmentStore, NEW, "CrashLoopBackOff"))
            .unwrap();

        let state = tick(&ctx, &cluster, &mut status).await;
        let ClusterState::Failed { kind, message } = state else {
            panic!("expected failed state, got {state:?}");
        };
        assert_eq!(kind, FailureKind::Upgrade);
        assert!(message.contains("CrashLoopBackOff"));
        assert!(status.has_upgrade_failed());
        assert!(status.is_upgrading());
        assert_eq!(status.target_version.as_deref(), Some(NEW));

        // Unchanged spec: the cluster stays failed without touching anything.
        let writes = ctx.store.mutation_count();
        let state = tick(&ctx, &cluster, &mut status).await;
        assert!(matches!(state, ClusterState::Failed { .. }));
        assert_eq!(ctx.store.mutation_count(), writes);

        // Asking for the previous version rolls back, controller first.
        cluster.spec.version = OLD.to_string();
        let state = tick(&ctx, &cluster, &mut status).await;
        assert_eq!(
            state,
            ClusterState::RollingBack {
                phase: Component::SegmentStore
            }
        );
        assert!(status.is_rolling_back());
        assert!(!status.is_upgrading());
        assert!(status.has_error());
        assert_eq!(status.version_history, vec![OLD.to_string()]);
        assert!(ctx.store.snapshot::<Pod>(NAMESPACE, SS_0).is_none());

        ctx.store
            .put(&test_pod(SS_0, Component::SegmentStore, OLD, true))
            .unwrap();
        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(state, ClusterState::Stable);
        assert_eq!(status.current_version.as_deref(), Some(OLD));
        assert!(!status.is_rolling_back());
        assert!(!status.has_error());
        assert_eq!(status.version_history, vec![OLD.to_string()]);
    }

    #[tokio::test]
    async fn test_stalled_phase_fails_with_progress_deadline() {
        let ctx = test_context();
        let mut cluster = running_cluster(&ctx);
        let mut status = stable_status(OLD);
        cluster.spec.version = NEW.to_string();

        tick(&ctx, &cluster, &mut status).await;
        tick(&ctx, &cluster, &mut status).await;
        assert!(status.is_upgrading());

        let stale = (Utc::now() - ctx.config.upgrade_timeout() - Duration::minutes(1)).to_rfc3339();
        for condition in &mut status.conditions {
            if condition.r#type == CONDITION_TYPE_UPGRADING {
                condition.last_update_time = Some(stale.clone());
            }
        }

        let state = tick(&ctx, &cluster, &mut status).await;

        assert!(matches!(
            state,
            ClusterState::Failed {
                kind: FailureKind::Upgrade,
                ..
            }
        ));
        let (_, error) = status.get_condition(CONDITION_TYPE_ERROR).unwrap();
        assert_eq!(error.status, STATUS_TRUE);
        assert_eq!(error.reason.as_deref(), Some(REASON_UPGRADE_FAILED));
        assert!(error
            .message
            .as_deref()
            .unwrap()
            .contains("progress deadline exceeded"));
    }

    fn failed_status() -> PravegaClusterStatus {
        let mut status = stable_status("0.12.0");
        status.target_version = Some("0.13.0".to_string());
        status.version_history = vec![
            "0.13.0".to_string(),
            "0.12.0".to_string(),
            "0.11.0".to_string(),
        ];
        status.set_condition(
            CONDITION_TYPE_UPGRADING,
            STATUS_TRUE,
            REASON_UPDATING_SEGMENT_STORE,
            "1",
        );
        status.set_condition(CONDITION_TYPE_ERROR, STATUS_TRUE, REASON_UPGRADE_FAILED, "boom");
        status
    }

    #[tokio::test]
    async fn test_older_history_version_is_not_a_rollback() {
        let ctx = test_context();
        let cluster = test_cluster("0.11.0");
        let mut status = failed_status();

        let state = tick(&ctx, &cluster, &mut status).await;

        assert!(matches!(state, ClusterState::Failed { .. }));
        assert!(!status.is_rolling_back());
        assert_eq!(status.target_version.as_deref(), Some("0.13.0"));
        assert_eq!(ctx.store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_new_version_after_failure_starts_forward_upgrade() {
        let ctx = test_context();
        let cluster = test_cluster("0.14.0");
        let mut status = failed_status();

        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(
            state,
            ClusterState::Upgrading {
                phase: Component::SegmentStore
            }
        );
        assert!(!status.has_error());
        assert_eq!(status.target_version.as_deref(), Some("0.14.0"));
        assert_eq!(
            status.version_history,
            vec![
                "0.14.0".to_string(),
                "0.12.0".to_string(),
                "0.11.0".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_retarget_mid_upgrade_restarts_first_phase() {
        let ctx = test_context();
        let mut cluster = running_cluster(&ctx);
        let mut status = stable_status(OLD);
        cluster.spec.version = NEW.to_string();
        tick(&ctx, &cluster, &mut status).await;

        cluster.spec.version = "0.14.0".to_string();
        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(
            state,
            ClusterState::Upgrading {
                phase: Component::SegmentStore
            }
        );
        assert_eq!(status.target_version.as_deref(), Some("0.14.0"));
        assert_eq!(
            status.version_history,
            vec!["0.14.0".to_string(), OLD.to_string()]
        );
    }

    fn cache_claim(name: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(component_labels(NAME, Component::SegmentStore.label())),
                ..ObjectMeta::default()
            },
            ..PersistentVolumeClaim::default()
        }
    }

    #[tokio::test]
    async fn test_layout_migration_retires_old_statefulset_after_first_ready_replica() {
        let ctx = test_context();
        let mut cluster = test_cluster("0.6.0");
        let legacy = make_segment_store_statefulset(&cluster, "0.6.0");
        let legacy_name = legacy.name_any();
        ctx.store.put(&legacy).unwrap();
        for ordinal in 0..2 {
            ctx.store
                .put(&cache_claim(&format!("cache-{legacy_name}-{ordinal}")))
                .unwrap();
        }
        let mut status = stable_status("0.6.0");
        cluster.spec.version = "0.7.0".to_string();

        tick(&ctx, &cluster, &mut status).await;
        let new_name = cluster.segment_store_sts_name("0.7.0");
        assert_ne!(new_name, legacy_name);
        let mut created: StatefulSet = ctx.store.snapshot(NAMESPACE, &new_name).unwrap();

        // No ready replica on the new statefulset yet.
        tick(&ctx, &cluster, &mut status).await;
        assert!(ctx
            .store
            .snapshot::<StatefulSet>(NAMESPACE, &legacy_name)
            .is_some());

        created.status = Some(StatefulSetStatus {
            replicas: 2,
            ready_replicas: Some(1),
            ..StatefulSetStatus::default()
        });
        ctx.store.put(&created).unwrap();
        let state = tick(&ctx, &cluster, &mut status).await;

        assert_eq!(
            state,
            ClusterState::Upgrading {
                phase: Component::SegmentStore
            }
        );
        assert!(ctx
            .store
            .snapshot::<StatefulSet>(NAMESPACE, &legacy_name)
            .is_none());
        assert!(ctx
            .store
            .all::<PersistentVolumeClaim>(NAMESPACE)
            .is_empty());
        assert!(ctx
            .store
            .snapshot::<StatefulSet>(NAMESPACE, &new_name)
            .is_some());
    }
}
