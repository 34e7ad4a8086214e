// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-process [`ClusterStore`].
//!
//! Objects are kept as JSON keyed by (kind, namespace, name) and follow the API server
//! rules the reconcilers depend on:
//!
//! - `create` assigns a UID, a resource version and generation 1
//! - `update` rejects stale resource versions, keeps the stored status and bumps the
//!   generation when the spec changes
//! - `delete` of an object with finalizers only sets its deletion timestamp; the object
//!   goes away once an update empties its finalizers
//! - deleting an object deletes everything that lists it as an owner
//!
//! Every mutating call made through the trait is counted, which is how tests assert
//! that a reconcile pass with nothing to do writes nothing.

use super::{ClusterStore, StoreError, StoreObject};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Key = (String, String, String);

/// Thread-safe in-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<Key, Value>>,
    next_version: AtomicU64,
    mutations: AtomicUsize,
}

fn key<K: StoreObject>(namespace: &str, name: &str) -> Key {
    (
        K::kind(&()).to_string(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn meta_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get("metadata")?.get(field)?.as_str()
}

fn labels_match(value: &Value, selector: &BTreeMap<String, String>) -> bool {
    let labels = value.get("metadata").and_then(|m| m.get("labels"));
    selector.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .and_then(Value::as_str)
            .is_some_and(|actual| actual == v)
    })
}

fn owned_by(value: &Value, uid: &str) -> bool {
    value
        .get("metadata")
        .and_then(|m| m.get("ownerReferences"))
        .and_then(Value::as_array)
        .is_some_and(|refs| {
            refs.iter()
                .any(|r| r.get("uid").and_then(Value::as_str) == Some(uid))
        })
}

fn has_finalizers(value: &Value) -> bool {
    value
        .get("metadata")
        .and_then(|m| m.get("finalizers"))
        .and_then(Value::as_array)
        .is_some_and(|f| !f.is_empty())
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Key, Value>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn set_meta(value: &mut Value, field: &str, field_value: Value) {
        if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert(field.to_string(), field_value);
        }
    }

    /// Number of create, update, status and delete calls made through the trait.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Store `object` as-is, as another actor (kubelet, user) would. Assigns a UID when
    /// missing and always bumps the resource version. Not counted as a mutation.
    ///
    /// # Errors
    ///
    /// Fails when the object cannot be serialized or lacks a name or namespace.
    pub fn put<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        let (namespace, name) = Self::object_key(object)?;
        let mut value = serde_json::to_value(object)?;
        let mut objects = self.lock();
        if meta_str(&value, "uid").is_none() {
            let uid = format!("uid-{}", self.bump_version());
            Self::set_meta(&mut value, "uid", json!(uid));
        }
        if meta_str(&value, "creationTimestamp").is_none() {
            Self::set_meta(&mut value, "creationTimestamp", json!(Utc::now().to_rfc3339()));
        }
        Self::set_meta(&mut value, "resourceVersion", json!(self.bump_version()));
        objects.insert(key::<K>(&namespace, &name), value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Synchronous read for assertions.
    pub fn snapshot<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .get(&key::<K>(namespace, name))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Synchronous list of every object of a kind in `namespace`.
    pub fn all<K: StoreObject>(&self, namespace: &str) -> Vec<K> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .filter_map(|(_, v)| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Remove an object without finalizer or cascade handling, as a kubelet would
    /// when a pod finishes terminating.
    pub fn remove<K: StoreObject>(&self, namespace: &str, name: &str) -> bool {
        self.lock().remove(&key::<K>(namespace, name)).is_some()
    }

    fn object_key<K: StoreObject>(object: &K) -> Result<(String, String), StoreError> {
        let meta = object.meta();
        let namespace = meta
            .namespace
            .clone()
            .ok_or_else(|| StoreError::Invalid(format!("{} has no namespace", K::kind(&()))))?;
        let name = meta
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid(format!("{} has no name", K::kind(&()))))?;
        Ok((namespace, name))
    }

    fn purge(objects: &mut BTreeMap<Key, Value>, root: &Key) {
        let Some(removed) = objects.remove(root) else {
            return;
        };
        let Some(uid) = meta_str(&removed, "uid").map(str::to_string) else {
            return;
        };
        let dependents: Vec<Key> = objects
            .iter()
            .filter(|((_, ns, _), v)| *ns == root.1 && owned_by(v, &uid))
            .map(|(k, _)| k.clone())
            .collect();
        for dependent in dependents {
            Self::purge(objects, &dependent);
        }
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, StoreError> {
        match self.lock().get(&key::<K>(namespace, name)) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let (namespace, name) = Self::object_key(object)?;
        let key = key::<K>(&namespace, &name);
        let mut value = serde_json::to_value(object)?;

        let mut objects = self.lock();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: key.0,
                namespace,
                name,
            });
        }

        let uid = format!("uid-{}", self.bump_version());
        Self::set_meta(&mut value, "uid", json!(uid));
        Self::set_meta(&mut value, "resourceVersion", json!(self.bump_version()));
        Self::set_meta(&mut value, "generation", json!(1));
        Self::set_meta(&mut value, "creationTimestamp", json!(Utc::now().to_rfc3339()));
        objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let (namespace, name) = Self::object_key(object)?;
        let key = key::<K>(&namespace, &name);
        let mut value = serde_json::to_value(object)?;

        let mut objects = self.lock();
        let Some(stored) = objects.get(&key).cloned() else {
            return Err(StoreError::NotFound {
                kind: key.0,
                namespace,
                name,
            });
        };

        let stored_version = meta_str(&stored, "resourceVersion");
        if let Some(expected) = meta_str(&value, "resourceVersion") {
            if stored_version != Some(expected) {
                return Err(StoreError::Conflict {
                    kind: key.0,
                    namespace,
                    name,
                });
            }
        }

        // Status is only writable through update_status
        if let Some(map) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }

        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            if let Some(v) = stored.get("metadata").and_then(|m| m.get(field)) {
                Self::set_meta(&mut value, field, v.clone());
            }
        }

        let generation = stored
            .get("metadata")
            .and_then(|m| m.get("generation"))
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if stored.get("spec") == value.get("spec") {
            generation
        } else {
            generation + 1
        };
        Self::set_meta(&mut value, "generation", json!(generation));
        Self::set_meta(&mut value, "resourceVersion", json!(self.bump_version()));

        let terminating = meta_str(&value, "deletionTimestamp").is_some();
        if terminating && !has_finalizers(&value) {
            Self::purge(&mut objects, &key);
        } else {
            objects.insert(key, value.clone());
        }
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<K: StoreObject>(&self, object: &K) -> Result<K, StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let (namespace, name) = Self::object_key(object)?;
        let key = key::<K>(&namespace, &name);
        let status = serde_json::to_value(object)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);

        let mut objects = self.lock();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(StoreError::NotFound {
                kind: key.0,
                namespace,
                name,
            });
        };
        if let Some(map) = stored.as_object_mut() {
            map.insert("status".to_string(), status);
        }
        let version = self.bump_version();
        Self::set_meta(stored, "resourceVersion", json!(version));
        Ok(serde_json::from_value(stored.clone())?)
    }

    async fn delete<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.mutations.fetch_add(1, Ordering::SeqCst);
        let key = key::<K>(namespace, name);

        let mut objects = self.lock();
        let Some(stored) = objects.get_mut(&key) else {
            return Err(StoreError::NotFound {
                kind: key.0,
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };

        if has_finalizers(stored) {
            if meta_str(stored, "deletionTimestamp").is_none() {
                Self::set_meta(stored, "deletionTimestamp", json!(Utc::now().to_rfc3339()));
                let version = self.bump_version();
                Self::set_meta(stored, "resourceVersion", json!(version));
            }
            return Ok(());
        }

        Self::purge(&mut objects, &key);
        Ok(())
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>, StoreError> {
        let kind = K::kind(&()).to_string();
        self.lock()
            .iter()
            .filter(|((k, ns, _), v)| *k == kind && ns == namespace && labels_match(v, labels))
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(StoreError::from))
            .collect()
    }
}
