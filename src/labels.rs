// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Pravega-specific labels/annotations
//! to ensure consistency across all resources created by the operator.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_PRAVEGA_OPERATOR: &str = "pravega-operator";

// ============================================================================
// Pravega Cluster Labels
// ============================================================================

/// Label carrying the application name on every child object
pub const APP_LABEL: &str = "app";

/// Value of the `app` label
pub const APP_PRAVEGA_CLUSTER: &str = "pravega-cluster";

/// Label carrying the owning cluster name
pub const CLUSTER_LABEL: &str = "pravega_cluster";

/// Label carrying the component name
pub const COMPONENT_LABEL: &str = "component";

/// Component value for controller objects
pub const COMPONENT_CONTROLLER: &str = "pravega-controller";

/// Component value for segment store objects
pub const COMPONENT_SEGMENT_STORE: &str = "pravega-segmentstore";

/// Component value for bookkeeper objects
pub const COMPONENT_BOOKIE: &str = "bookie";

// ============================================================================
// Pravega-Specific Annotations
// ============================================================================

/// Pod annotation recording the Pravega version a pod was created for
pub const VERSION_ANNOTATION: &str = "pravega.version";

/// Pod template annotation carrying the hash of the desired template
pub const TEMPLATE_HASH_ANNOTATION: &str = "pravega.pravega.io/template-hash";

/// Config map annotation carrying the hash of the rendered data
pub const CONFIG_HASH_ANNOTATION: &str = "pravega.pravega.io/config-hash";

/// External DNS hostname annotation on per-replica services
pub const EXTERNAL_DNS_HOSTNAME_ANNOTATION: &str = "external-dns.alpha.kubernetes.io/hostname";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer guarding ZooKeeper metadata cleanup for `PravegaCluster` resources
pub const FINALIZER_PRAVEGA_CLUSTER: &str = "cleanUpZookeeper";

// ============================================================================
// Label Set Builders
// ============================================================================

/// Labels shared by every object owned by cluster `cluster_name`.
#[must_use]
pub fn cluster_labels(cluster_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_LABEL.to_string(), APP_PRAVEGA_CLUSTER.to_string());
    labels.insert(CLUSTER_LABEL.to_string(), cluster_name.to_string());
    labels
}

/// Labels selecting one component of cluster `cluster_name`.
///
/// These are also the pod selector labels, so they never carry anything
/// that changes across versions.
#[must_use]
pub fn component_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster_name);
    labels.insert(COMPONENT_LABEL.to_string(), component.to_string());
    labels
}

/// Component labels plus the standard `app.kubernetes.io` ownership labels.
#[must_use]
pub fn object_labels(cluster_name: &str, component: &str) -> BTreeMap<String, String> {
    let mut labels = component_labels(cluster_name, component);
    labels.insert(
        K8S_MANAGED_BY.to_string(),
        MANAGED_BY_PRAVEGA_OPERATOR.to_string(),
    );
    labels.insert(K8S_PART_OF.to_string(), cluster_name.to_string());
    labels
}
