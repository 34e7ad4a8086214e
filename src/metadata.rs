// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster metadata cleanup.
//!
//! A Pravega cluster keeps its coordination metadata in ZooKeeper under
//! `/pravega/<cluster>`. When the cluster resource is deleted that tree has to go too,
//! otherwise a new cluster with the same name would pick up stale stream metadata.
//! The `bookkeeper` subtree is left alone because a separately managed bookkeeper
//! ensemble owns it.
//!
//! The reconcile loop only sees the [`MetadataCleanup`] trait. The operator binary
//! plugs in [`ZookeeperMetadataCleanup`], which runs `zkCli.sh` inside a ZooKeeper
//! server pod through the pod exec API.

use crate::constants::ZOOKEEPER_CLIENT_PORT;
use crate::crd::PravegaCluster;
use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{AttachParams, ListParams};
use kube::{Api, Client, ResourceExt};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

/// Root znode under which Pravega clusters keep their metadata
pub const PRAVEGA_ZNODE_ROOT: &str = "/pravega";

/// Znode child owned by the bookkeeper ensemble and never deleted
pub const BOOKKEEPER_ZNODE: &str = "bookkeeper";

/// Printed by the cleanup script once every child has been handled
pub(crate) const CLEANUP_DONE_MARKER: &str = "pravega-metadata-cleanup-done";

/// What the cleanup collaborator needs to know about a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRef {
    pub namespace: String,
    pub name: String,
    pub zookeeper_uri: String,
}

impl ClusterRef {
    #[must_use]
    pub fn from_cluster(cluster: &PravegaCluster) -> Self {
        Self {
            namespace: cluster.namespace().unwrap_or_default(),
            name: cluster.name_any(),
            zookeeper_uri: cluster.spec.zookeeper_uri.clone(),
        }
    }

    /// Znode holding this cluster's metadata.
    #[must_use]
    pub fn znode_path(&self) -> String {
        format!("{PRAVEGA_ZNODE_ROOT}/{}", self.name)
    }
}

/// Deletes a cluster's external metadata.
///
/// Implementations must be idempotent: calling this when nothing is left to delete
/// succeeds.
#[async_trait]
pub trait MetadataCleanup: Send + Sync {
    async fn delete_all_metadata(&self, cluster: &ClusterRef) -> Result<()>;
}

/// Split a ZooKeeper connection string into the service name and namespace it
/// points at. Only the first host of a multi-host string is used. A bare service
/// name resolves in `default_namespace`.
#[must_use]
pub fn zookeeper_service(uri: &str, default_namespace: &str) -> (String, String) {
    let first = uri.split(',').next().unwrap_or_default().trim();
    let host = first.split(':').next().unwrap_or_default();
    let mut parts = host.split('.');
    let service = parts.next().unwrap_or_default().to_string();
    let namespace = parts
        .next()
        .filter(|ns| !ns.is_empty())
        .unwrap_or(default_namespace)
        .to_string();
    (service, namespace)
}

/// Shell script deleting every child of the cluster's znode except the bookkeeper
/// subtree.
///
/// A missing znode is the only failure treated as nothing to delete. Any other
/// `zkCli.sh` error prints the message and exits non-zero without the done marker.
#[must_use]
pub fn cleanup_script(cluster: &ClusterRef) -> String {
    let root = cluster.znode_path();
    format!(
        r#"ZKCLI=$(command -v zkCli.sh || echo ./bin/zkCli.sh)
SERVER=localhost:{ZOOKEEPER_CLIENT_PORT}
fail() {{
  echo "$1"
  exit 1
}}
OUTPUT=$($ZKCLI -server $SERVER ls {root} 2>&1)
case "$OUTPUT" in
  *"Node does not exist"*)
    echo {CLEANUP_DONE_MARKER}
    exit 0
    ;;
esac
LISTING=$(echo "$OUTPUT" | grep '^\[' | tail -n 1)
[ -n "$LISTING" ] || fail "cannot list {root}: $OUTPUT"
for child in $(echo "$LISTING" | tr -d '[],'); do
  if [ "$child" != "{BOOKKEEPER_ZNODE}" ]; then
    RESULT=$($ZKCLI -server $SERVER deleteall {root}/$child 2>&1) ||
      fail "cannot delete {root}/$child: $RESULT"
    case "$RESULT" in
      *Exception*|*KeeperErrorCode*) fail "cannot delete {root}/$child: $RESULT" ;;
    esac
  fi
done
echo {CLEANUP_DONE_MARKER}
"#
    )
}

/// Cleanup through `zkCli.sh` executed in a ZooKeeper server pod.
#[derive(Clone)]
pub struct ZookeeperMetadataCleanup {
    client: Client,
}

impl ZookeeperMetadataCleanup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn find_server_pod(&self, cluster: &ClusterRef) -> Result<(String, String)> {
        let (service_name, namespace) =
            zookeeper_service(&cluster.zookeeper_uri, &cluster.namespace);

        let services: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let service = services
            .get(&service_name)
            .await
            .with_context(|| {
                format!("failed to get zookeeper service {namespace}/{service_name}")
            })?;

        let selector = service
            .spec
            .and_then(|s| s.selector)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!("zookeeper service {namespace}/{service_name} has no selector")
            })?;
        let selector = selector
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let running = pods
            .list(&ListParams::default().labels(&selector))
            .await
            .with_context(|| format!("failed to list zookeeper pods in {namespace}"))?
            .items
            .into_iter()
            .find(|p| {
                p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
            })
            .ok_or_else(|| anyhow!("no running zookeeper pod behind {namespace}/{service_name}"))?;

        Ok((namespace, running.name_any()))
    }
}

#[async_trait]
impl MetadataCleanup for ZookeeperMetadataCleanup {
    async fn delete_all_metadata(&self, cluster: &ClusterRef) -> Result<()> {
        let (namespace, pod) = self.find_server_pod(cluster).await?;
        debug!(
            namespace = %cluster.namespace,
            name = %cluster.name,
            zookeeper_pod = %format!("{namespace}/{pod}"),
            "Running zookeeper metadata cleanup"
        );

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let script = cleanup_script(cluster);
        let mut attached = pods
            .exec(
                &pod,
                vec!["sh", "-c", script.as_str()],
                &AttachParams::default().stderr(false),
            )
            .await
            .with_context(|| format!("failed to exec into zookeeper pod {namespace}/{pod}"))?;

        let mut output = String::new();
        if let Some(mut stdout) = attached.stdout() {
            stdout
                .read_to_string(&mut output)
                .await
                .context("failed to read cleanup output")?;
        }
        attached
            .join()
            .await
            .map_err(|e| anyhow!("cleanup exec in {namespace}/{pod} did not finish: {e}"))?;

        if !output.contains(CLEANUP_DONE_MARKER) {
            bail!(
                "zookeeper cleanup of {} did not complete: {}",
                cluster.znode_path(),
                output.trim()
            );
        }

        info!(
            namespace = %cluster.namespace,
            name = %cluster.name,
            znode = %cluster.znode_path(),
            "Deleted zookeeper metadata"
        );
        Ok(())
    }
}
