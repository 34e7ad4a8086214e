// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic create and update helpers for cluster child objects.
//!
//! Every child object goes through one of these helpers, which keeps logging and
//! metrics uniform and keeps the "only write when something differs" rule in one
//! place.
//!
//! # Strategies
//!
//! - **Create if absent**: workloads and per-replica services, which are never
//!   modified in place by the convergence pass
//! - **Create or update**: config maps, services and PDBs; the caller supplies a
//!   function copying only the fields it owns from the desired object onto the
//!   live one, so server-managed fields survive
//!
//! # Example
//!
//! ```rust,ignore
//! use pravega_operator::reconcilers::resources::create_or_update;
//!
//! let applied = create_or_update(&ctx.store, &desired_config_map, |live, desired| {
//!     if live.data == desired.data {
//!         return false;
//!     }
//!     live.data.clone_from(&desired.data);
//!     true
//! })
//! .await?;
//! ```

use crate::metrics;
use crate::store::{ClusterStore, StoreError, StoreObject};
use anyhow::{anyhow, Context as _, Result};
use kube::ResourceExt;
use tracing::{debug, info};

/// What a helper did to the live object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

fn object_key<K: StoreObject>(object: &K) -> Result<(String, String)> {
    let name = object
        .meta()
        .name
        .clone()
        .ok_or_else(|| anyhow!("{} must have a name", K::kind(&())))?;
    let namespace = object
        .namespace()
        .ok_or_else(|| anyhow!("{} {} must have a namespace", K::kind(&()), name))?;
    Ok((namespace, name))
}

/// Fetch an object, attaching its kind and name to any error.
///
/// # Errors
///
/// Returns an error if the store call fails. A missing object is `Ok(None)`.
pub async fn get_object<S, K>(store: &S, namespace: &str, name: &str) -> Result<Option<K>>
where
    S: ClusterStore,
    K: StoreObject,
{
    store
        .get::<K>(namespace, name)
        .await
        .with_context(|| format!("getting {} {}/{}", K::kind(&()), namespace, name))
}

/// Create `desired` unless an object with its name already exists.
///
/// # Errors
///
/// Returns an error if the object has no name or namespace, or if a store call fails.
pub async fn create_if_absent<S, K>(store: &S, desired: &K) -> Result<Applied>
where
    S: ClusterStore,
    K: StoreObject,
{
    let (namespace, name) = object_key(desired)?;

    if get_object::<S, K>(store, &namespace, &name).await?.is_some() {
        debug!("{} {}/{} already exists", K::kind(&()), namespace, name);
        return Ok(Applied::Unchanged);
    }

    match store.create(desired).await {
        Ok(_) => {
            info!("Created {} {}/{}", K::kind(&()), namespace, name);
            metrics::record_resource_created(&K::kind(&()));
            Ok(Applied::Created)
        }
        Err(StoreError::AlreadyExists { .. }) => {
            debug!("{} {}/{} was created concurrently", K::kind(&()), namespace, name);
            Ok(Applied::Unchanged)
        }
        Err(e) => Err(e).with_context(|| {
            format!("creating {} {}/{}", K::kind(&()), namespace, name)
        }),
    }
}

/// Create `desired`, or bring the live object in line with it.
///
/// `reconcile` receives the live object and the desired one. It copies the fields
/// the operator owns onto the live object and returns `true` if anything changed;
/// only then is the object written back.
///
/// # Errors
///
/// Returns an error if the object has no name or namespace, or if a store call
/// fails. A lost optimistic-concurrency race surfaces as an error and is retried on
/// the next reconcile.
pub async fn create_or_update<S, K, F>(store: &S, desired: &K, reconcile: F) -> Result<Applied>
where
    S: ClusterStore,
    K: StoreObject,
    F: FnOnce(&mut K, &K) -> bool,
{
    let (namespace, name) = object_key(desired)?;

    let Some(mut live) = get_object::<S, K>(store, &namespace, &name).await? else {
        return create_if_absent(store, desired).await;
    };

    if !reconcile(&mut live, desired) {
        debug!("{} {}/{} is up to date", K::kind(&()), namespace, name);
        return Ok(Applied::Unchanged);
    }

    store
        .update(&live)
        .await
        .with_context(|| format!("updating {} {}/{}", K::kind(&()), namespace, name))?;
    info!("Updated {} {}/{}", K::kind(&()), namespace, name);
    metrics::record_resource_updated(&K::kind(&()));
    Ok(Applied::Updated)
}

/// Write back an object the caller already modified.
///
/// # Errors
///
/// Returns an error if the store rejects the update.
pub async fn update_object<S, K>(store: &S, object: &K) -> Result<K>
where
    S: ClusterStore,
    K: StoreObject,
{
    let (namespace, name) = object_key(object)?;
    let updated = store
        .update(object)
        .await
        .with_context(|| format!("updating {} {}/{}", K::kind(&()), namespace, name))?;
    info!("Updated {} {}/{}", K::kind(&()), namespace, name);
    metrics::record_resource_updated(&K::kind(&()));
    Ok(updated)
}

/// Delete an object, treating "already gone" as success.
///
/// Returns `true` if this call deleted it.
///
/// # Errors
///
/// Returns an error for any store failure other than not-found.
pub async fn delete_if_exists<S, K>(store: &S, namespace: &str, name: &str) -> Result<bool>
where
    S: ClusterStore,
    K: StoreObject,
{
    match store.delete::<K>(namespace, name).await {
        Ok(()) => {
            info!("Deleted {} {}/{}", K::kind(&()), namespace, name);
            metrics::record_resource_deleted(&K::kind(&()));
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            debug!("{} {}/{} already deleted", K::kind(&()), namespace, name);
            Ok(false)
        }
        Err(e) => {
            Err(e).with_context(|| format!("deleting {} {}/{}", K::kind(&()), namespace, name))
        }
    }
}
