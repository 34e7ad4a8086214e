// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `workloads.rs`

#[cfg(test)]
mod tests {
    use crate::cluster_resources::{make_controller_deployment, make_segment_store_statefulset};
    use crate::crd::{Component, PravegaClusterStatus};
    use crate::reconcilers::test_helpers::{test_cluster, test_context, test_pod, NAMESPACE};
    use crate::reconcilers::upgrade_state_machine::ClusterState;
    use crate::reconcilers::workloads::{adopt_template, deploy_workloads, template_differs};
    use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
    use kube::ResourceExt;

    fn running(version: &str) -> PravegaClusterStatus {
        let mut status = PravegaClusterStatus::default();
        status.init();
        status.current_version = Some(version.to_string());
        status
    }

    #[tokio::test]
    async fn test_stable_cluster_gets_its_workloads() {
        let ctx = test_context();
        let cluster = test_cluster("0.13.0");
        let mut status = PravegaClusterStatus::default();

        deploy_workloads(&ctx, &cluster, &mut status, &ClusterState::Stable)
            .await
            .unwrap();

        let deployments = ctx.store.all::<Deployment>(NAMESPACE);
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].name_any(), cluster.controller_name());
        let statefulsets = ctx.store.all::<StatefulSet>(NAMESPACE);
        assert_eq!(statefulsets.len(), 1);
        assert_eq!(
            statefulsets[0].name_any(),
            cluster.segment_store_sts_name("0.13.0")
        );
        assert!(status.restarts.is_empty());

        let writes = ctx.store.mutation_count();
        deploy_workloads(&ctx, &cluster, &mut status, &ClusterState::Stable)
            .await
            .unwrap();
        assert_eq!(ctx.store.mutation_count(), writes);
    }

    #[tokio::test]
    async fn test_upgrading_cluster_is_left_to_the_state_machine() {
        let ctx = test_context();
        let cluster = test_cluster("0.13.0");
        let mut status = PravegaClusterStatus::default();
        let state = ClusterState::Upgrading {
            phase: Component::SegmentStore,
        };

        deploy_workloads(&ctx, &cluster, &mut status, &state)
            .await
            .unwrap();

        assert_eq!(ctx.store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_template_drift_updates_and_plans_restart() {
        let ctx = test_context();
        let mut cluster = test_cluster("0.13.0");
        ctx.store
            .put(&make_segment_store_statefulset(&cluster, "0.13.0"))
            .unwrap();
        for ordinal in [1, 0] {
            ctx.store
                .put(&test_pod(
                    &format!("pravega-pravega-segment-store-{ordinal}"),
                    Component::SegmentStore,
                    "0.13.0",
                    true,
                ))
                .unwrap();
        }

        cluster.spec.pravega.options.insert(
            "pravegaservice.cache.size.max".to_string(),
            "1073741824".to_string(),
        );
        let mut status = running("0.13.0");
        deploy_workloads(&ctx, &cluster, &mut status, &ClusterState::Stable)
            .await
            .unwrap();

        let desired = make_segment_store_statefulset(&cluster, "0.13.0");
        let live: StatefulSet = ctx.store.snapshot(NAMESPACE, &desired.name_any()).unwrap();
        assert!(!template_differs(&live, &desired));

        assert_eq!(status.restarts.len(), 1);
        assert_eq!(status.restarts[0].component, Component::SegmentStore);
        assert_eq!(
            status.restarts[0].pending,
            vec![
                "pravega-pravega-segment-store-0".to_string(),
                "pravega-pravega-segment-store-1".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_segment_store_untouched_during_migration() {
        let ctx = test_context();
        let cluster = test_cluster("0.13.0");
        ctx.store
            .put(&make_segment_store_statefulset(&cluster, "0.6.0"))
            .unwrap();
        ctx.store
            .put(&make_controller_deployment(&cluster, "0.13.0"))
            .unwrap();
        let mut other = make_segment_store_statefulset(&cluster, "0.13.0");
        other.metadata.name = Some("pravega-pravega-segment-store-next".to_string());
        ctx.store.put(&other).unwrap();

        let mut status = running("0.13.0");
        deploy_workloads(&ctx, &cluster, &mut status, &ClusterState::Stable)
            .await
            .unwrap();

        assert_eq!(ctx.store.mutation_count(), 0);
        assert_eq!(ctx.store.all::<StatefulSet>(NAMESPACE).len(), 2);
    }

    #[tokio::test]
    async fn test_pending_version_change_leaves_templates_to_the_upgrade() {
        let ctx = test_context();
        let mut cluster = test_cluster("0.12.0");
        let live_controller = make_controller_deployment(&cluster, "0.12.0");
        ctx.store.put(&live_controller).unwrap();
        ctx.store
            .put(&make_segment_store_statefulset(&cluster, "0.12.0"))
            .unwrap();
        ctx.store
            .put(&test_pod(
                "pravega-pravega-segment-store-0",
                Component::SegmentStore,
                "0.12.0",
                true,
            ))
            .unwrap();

        // One edit bumps the version and changes the JVM options.
        cluster.spec.version = "0.13.0".to_string();
        cluster
            .spec
            .pravega
            .controller_jvm_options
            .push("-Xmx2g".to_string());
        cluster
            .spec
            .pravega
            .segment_store_jvm_options
            .push("-Xmx4g".to_string());
        let mut status = running("0.12.0");
        let writes = ctx.store.mutation_count();

        deploy_workloads(&ctx, &cluster, &mut status, &ClusterState::Stable)
            .await
            .unwrap();

        assert_eq!(ctx.store.mutation_count(), writes);
        assert!(status.restarts.is_empty());
        let controller: Deployment = ctx
            .store
            .snapshot(NAMESPACE, &cluster.controller_name())
            .unwrap();
        assert!(!template_differs(&controller, &live_controller));
    }

    #[test]
    fn test_adopt_template_keeps_replicas() {
        let mut cluster = test_cluster("0.13.0");
        let mut live = make_segment_store_statefulset(&cluster, "0.12.0");
        live.spec.as_mut().unwrap().replicas = Some(5);
        cluster.spec.pravega.segment_store_replicas = 3;
        let desired = make_segment_store_statefulset(&cluster, "0.13.0");
        assert!(template_differs(&live, &desired));

        adopt_template(&mut live, &desired);

        assert!(!template_differs(&live, &desired));
        assert_eq!(live.spec.as_ref().unwrap().replicas, Some(5));
        assert_eq!(
            live.spec.unwrap().template,
            desired.spec.unwrap().template
        );
    }
}
