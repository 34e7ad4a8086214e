// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `memory.rs`

#[cfg(test)]
mod tests {
    use crate::store::{ClusterStore, MemoryStore, StoreError};
    use k8s_openapi::api::core::v1::{ConfigMap, Pod};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    const NS: &str = "streaming";

    fn config_map(name: &str, labels: &[(&str, &str)]) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
            ..Default::default()
        }
    }

    fn owned_pod(name: &str, owner: &ConfigMap) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NS.to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "v1".to_string(),
                    kind: "ConfigMap".to_string(),
                    name: owner.metadata.name.clone().unwrap(),
                    uid: owner.metadata.uid.clone().unwrap(),
                    controller: Some(true),
                    block_owner_deletion: Some(true),
                }]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("cm", &[])).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(created.metadata.generation, Some(1));
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_create_duplicate_fails() {
        let store = MemoryStore::new();
        store.create(&config_map("cm", &[])).await.unwrap();

        let err = store.create(&config_map("cm", &[])).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_get_missing_is_none() {
        let store = MemoryStore::new();
        let found: Option<ConfigMap> = store.get(NS, "missing").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&config_map("cm", &[])).await.unwrap();

        let mut first = created.clone();
        first.data = Some(BTreeMap::from([("key".to_string(), "first".to_string())]));
        store.update(&first).await.unwrap();

        let mut stale = created;
        stale.data = Some(BTreeMap::from([("key".to_string(), "stale".to_string())]));
        let err = store.update(&stale).await.unwrap_err();
        assert!(err.is_conflict());

        let stored: ConfigMap = store.snapshot(NS, "cm").unwrap();
        assert_eq!(stored.data.unwrap()["key"], "first");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update(&config_map("cm", &[])).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_matches_label_subset() {
        let store = MemoryStore::new();
        store
            .create(&config_map("a", &[("app", "pravega-cluster"), ("component", "bookie")]))
            .await
            .unwrap();
        store
            .create(&config_map("b", &[("app", "pravega-cluster")]))
            .await
            .unwrap();
        store.create(&config_map("c", &[("app", "other")])).await.unwrap();

        let selector = BTreeMap::from([("app".to_string(), "pravega-cluster".to_string())]);
        let matched: Vec<ConfigMap> = store.list(NS, &selector).await.unwrap();
        assert_eq!(matched.len(), 2);

        let everything: Vec<ConfigMap> = store.list(NS, &BTreeMap::new()).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_owned_objects() {
        let store = MemoryStore::new();
        let owner = store.create(&config_map("owner", &[])).await.unwrap();
        store.create(&owned_pod("child-0", &owner)).await.unwrap();
        store.create(&owned_pod("child-1", &owner)).await.unwrap();

        store.delete::<ConfigMap>(NS, "owner").await.unwrap();

        assert!(store.snapshot::<ConfigMap>(NS, "owner").is_none());
        assert!(store.all::<Pod>(NS).is_empty());
    }

    #[tokio::test]
    async fn test_delete_with_finalizer_marks_terminating() {
        let store = MemoryStore::new();
        let mut cm = config_map("cm", &[]);
        cm.metadata.finalizers = Some(vec!["cleanUpZookeeper".to_string()]);
        store.create(&cm).await.unwrap();

        store.delete::<ConfigMap>(NS, "cm").await.unwrap();
        let terminating: ConfigMap = store.snapshot(NS, "cm").unwrap();
        assert!(terminating.metadata.deletion_timestamp.is_some());

        let mut released = terminating;
        released.metadata.finalizers = Some(vec![]);
        store.update(&released).await.unwrap();
        assert!(store.snapshot::<ConfigMap>(NS, "cm").is_none());
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete::<Pod>(NS, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_put_and_reads_are_not_mutations() {
        let store = MemoryStore::new();
        store.put(&config_map("cm", &[])).unwrap();
        let _: Option<ConfigMap> = store.get(NS, "cm").await.unwrap();
        let _: Vec<ConfigMap> = store.list(NS, &BTreeMap::new()).await.unwrap();

        assert_eq!(store.mutation_count(), 0);
    }
}
