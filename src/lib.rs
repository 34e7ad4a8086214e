// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Pravega Operator - Pravega streaming clusters on Kubernetes
//!
//! A Kubernetes operator written in Rust that deploys and manages Pravega streaming
//! storage clusters through the `PravegaCluster` Custom Resource Definition.
//!
//! ## Overview
//!
//! This library provides the core functionality of the operator:
//!
//! - The `PravegaCluster` CRD with defaulting and validation
//! - Builders for every child object (config maps, services, PDBs, workloads)
//! - Reconciliation: convergence, rolling restarts, scaling, upgrades and rollbacks
//! - Deletion handling with cleanup of the cluster's coordination metadata
//! - Prometheus metrics and probe endpoints
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types, defaulting and validation
//! - [`cluster_resources`] - Desired child objects of a cluster
//! - [`reconcilers`] - Reconciliation logic
//! - [`store`] - Object store abstraction over the Kubernetes API
//! - [`metadata`] - Coordination metadata cleanup
//! - [`context`] - Shared context passed to reconcilers
//! - [`config`] - Operator command-line and environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use pravega_operator::crd::{PravegaCluster, PravegaClusterSpec, PravegaSpec};
//!
//! let cluster = PravegaCluster::new(
//!     "pravega",
//!     PravegaClusterSpec {
//!         version: "0.13.0".to_string(),
//!         pravega: PravegaSpec {
//!             controller_replicas: 1,
//!             segment_store_replicas: 3,
//!             ..PravegaSpec::default()
//!         },
//!         ..PravegaClusterSpec::default()
//!     },
//! );
//! ```

pub mod cluster_resources;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod health;
pub mod labels;
pub mod metadata;
pub mod metrics;
pub mod reconcilers;
pub mod status_reasons;
pub mod store;
pub mod version;

#[cfg(test)]
mod context_tests;
#[cfg(test)]
mod version_tests;
