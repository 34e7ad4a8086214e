// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `convergence.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{Component, ExternalAccess, PravegaCluster};
    use crate::labels::EXTERNAL_DNS_HOSTNAME_ANNOTATION;
    use crate::reconcilers::convergence::{
        reconcile_children, reconcile_config_maps, reconcile_services,
    };
    use crate::reconcilers::test_helpers::{test_cluster, test_context, NAMESPACE};
    use crate::reconcilers::upgrade_state_machine::ClusterState;
    use k8s_openapi::api::core::v1::{ConfigMap, Service};
    use k8s_openapi::api::policy::v1::PodDisruptionBudget;
    use kube::ResourceExt;

    fn external_cluster(domain: Option<&str>) -> PravegaCluster {
        let mut cluster = test_cluster("0.13.0");
        cluster.spec.external_access = ExternalAccess {
            enabled: true,
            service_type: Some("LoadBalancer".to_string()),
            domain_name: domain.map(str::to_string),
        };
        cluster
    }

    fn service_names(services: &[Service]) -> Vec<String> {
        let mut names: Vec<String> = services.iter().map(ResourceExt::name_any).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_children_created_once() {
        let ctx = test_context();
        let cluster = test_cluster("0.13.0");

        reconcile_children(&ctx, &cluster, &ClusterState::Stable)
            .await
            .unwrap();

        assert_eq!(ctx.store.all::<ConfigMap>(NAMESPACE).len(), 2);
        assert_eq!(
            service_names(&ctx.store.all::<Service>(NAMESPACE)),
            vec![
                cluster.controller_name(),
                cluster.segment_store_headless_service_name()
            ]
        );
        assert_eq!(ctx.store.all::<PodDisruptionBudget>(NAMESPACE).len(), 2);

        let writes = ctx.store.mutation_count();
        reconcile_children(&ctx, &cluster, &ClusterState::Stable)
            .await
            .unwrap();
        assert_eq!(ctx.store.mutation_count(), writes);
    }

    #[tokio::test]
    async fn test_option_change_updates_config_map() {
        let ctx = test_context();
        let mut cluster = test_cluster("0.13.0");
        reconcile_config_maps(&ctx, &cluster).await.unwrap();
        let name = cluster.segment_store_config_map_name();
        let before: ConfigMap = ctx.store.snapshot(NAMESPACE, &name).unwrap();

        cluster.spec.pravega.options.insert(
            "pravegaservice.cache.size.max".to_string(),
            "1073741824".to_string(),
        );
        reconcile_config_maps(&ctx, &cluster).await.unwrap();

        let after: ConfigMap = ctx.store.snapshot(NAMESPACE, &name).unwrap();
        assert_ne!(before.data, after.data);
        assert!(after.data.unwrap()["JAVA_OPTS"].contains("-Dpravegaservice.cache.size.max="));
    }

    #[tokio::test]
    async fn test_controller_service_drift_is_reverted() {
        let ctx = test_context();
        let cluster = test_cluster("0.13.0");
        reconcile_services(&ctx, &cluster, &ClusterState::Stable)
            .await
            .unwrap();

        let mut live: Service = ctx
            .store
            .snapshot(NAMESPACE, &cluster.controller_name())
            .unwrap();
        live.spec.as_mut().unwrap().type_ = Some("NodePort".to_string());
        ctx.store.put(&live).unwrap();

        reconcile_services(&ctx, &cluster, &ClusterState::Stable)
            .await
            .unwrap();

        let live: Service = ctx
            .store
            .snapshot(NAMESPACE, &cluster.controller_name())
            .unwrap();
        assert_eq!(live.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
    }

    #[tokio::test]
    async fn test_external_services_wait_for_stable_state() {
        let ctx = test_context();
        let cluster = external_cluster(None);
        let upgrading = ClusterState::Upgrading {
            phase: Component::SegmentStore,
        };

        reconcile_services(&ctx, &cluster, &upgrading).await.unwrap();
        assert_eq!(ctx.store.all::<Service>(NAMESPACE).len(), 2);

        reconcile_services(&ctx, &cluster, &ClusterState::Stable)
            .await
            .unwrap();
        let sts_name = cluster.segment_store_sts_name("0.13.0");
        let names = service_names(&ctx.store.all::<Service>(NAMESPACE));
        assert!(names.contains(&format!("{sts_name}-0")));
        assert!(names.contains(&format!("{sts_name}-1")));
    }

    #[tokio::test]
    async fn test_hostname_change_recreates_external_service() {
        let ctx = test_context();
        let previous = external_cluster(Some("old.example.com"));
        reconcile_services(&ctx, &previous, &ClusterState::Stable)
            .await
            .unwrap();
        let cluster = external_cluster(Some("new.example.com"));
        let name = format!("{}-0", cluster.segment_store_sts_name("0.13.0"));
        let before: Service = ctx.store.snapshot(NAMESPACE, &name).unwrap();

        reconcile_services(&ctx, &cluster, &ClusterState::Stable)
            .await
            .unwrap();

        let after: Service = ctx.store.snapshot(NAMESPACE, &name).unwrap();
        assert_ne!(after.uid(), before.uid());
        assert_eq!(
            after.annotations()[EXTERNAL_DNS_HOSTNAME_ANNOTATION],
            format!("{name}.new.example.com.")
        );
    }
}
