// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ClusterStore`] backed by the Kubernetes API server.

use super::{label_selector, ClusterStore, StoreError, StoreObject};
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Store that reads and writes through a `kube::Client`.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying client, for collaborators that need more than object CRUD.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_key<K: StoreObject>(object: &K) -> Result<(String, String), StoreError> {
    let namespace = object
        .namespace()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no namespace", K::kind(&()))))?;
    let name = object
        .meta()
        .name
        .clone()
        .ok_or_else(|| StoreError::Invalid(format!("{} has no name", K::kind(&()))))?;
    Ok((namespace, name))
}

fn map_error<K: StoreObject>(err: kube::Error, namespace: &str, name: &str) -> StoreError {
    let kind = K::kind(&()).to_string();
    let namespace = namespace.to_string();
    let name = name.to_string();
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            kind,
            namespace,
            name,
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                namespace,
                name,
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict {
            kind,
            namespace,
            name,
        },
        other => StoreError::Api(other),
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        debug!(
            namespace = %namespace,
            name = %name,
            kind = %K::kind(&()),
            "Creating resource"
        );
        self.api::<K>(&namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        debug!(
            namespace = %namespace,
            name = %name,
            kind = %K::kind(&()),
            resource_version = ?object.meta().resource_version,
            "Replacing resource"
        );
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = object_key(object)?;
        let value = serde_json::to_value(object)?;
        let status = value.get("status").cloned().unwrap_or_default();

        debug!(
            namespace = %namespace,
            name = %name,
            kind = %K::kind(&()),
            "Patching resource status"
        );
        self.api::<K>(&namespace)
            .patch_status(
                &name,
                &PatchParams::default(),
                &Patch::Merge(json!({ "status": status })),
            )
            .await
            .map_err(|e| map_error::<K>(e, &namespace, &name))
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        debug!(
            namespace = %namespace,
            name = %name,
            kind = %K::kind(&()),
            "Deleting resource"
        );
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error::<K>(e, namespace, name))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let params = ListParams::default().labels(&label_selector(labels));
        self.api::<K>(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(StoreError::Api)
    }
}
