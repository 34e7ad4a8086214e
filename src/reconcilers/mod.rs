// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation for `PravegaCluster` resources.
//!
//! The operator follows the standard Kubernetes controller pattern:
//!
//! 1. **Watch** - Monitor `PravegaCluster` changes and the objects it owns
//! 2. **Reconcile** - Compare the desired state (spec) with the observed state
//! 3. **Update** - Create, update or delete child objects to close the gap
//! 4. **Status** - Report versions, members and conditions back on the resource
//!
//! # Modules
//!
//! - [`pravegacluster`] - The reconcile pass and its stage ordering
//! - [`convergence`] - Config maps, services and pod disruption budgets
//! - [`workloads`] - Controller deployment, segment store and bookie statefulsets
//! - [`restart`] - Rolling restarts of statefulset pods after a template change
//! - [`scale`] - Replica synchronization and orphan cleanup on scale-down
//! - [`upgrade_state_machine`] - Version lifecycle states and their transitions
//! - [`upgrade`] - Phase executors driving upgrades and rollbacks
//! - [`finalizers`] - Finalizer management and the deletion sequence
//! - [`status`] - Condition helpers and status recomputation
//! - [`resources`] - Generic get/create/update/delete helpers over the store
//!
//! # Example: Using the Reconciler
//!
//! ```rust,no_run
//! use pravega_operator::context::OperatorContext;
//! use pravega_operator::reconcilers::reconcile_pravegacluster;
//!
//! async fn reconcile(ctx: &OperatorContext) -> anyhow::Result<()> {
//!     let outcome = reconcile_pravegacluster(ctx, "streaming", "pravega").await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod convergence;
pub mod finalizers;
pub mod pravegacluster;
pub mod resources;
pub mod restart;
pub mod scale;
pub mod status;
pub mod upgrade;
pub mod upgrade_state_machine;
pub mod workloads;

#[cfg(test)]
mod test_helpers;

#[cfg(test)]
mod convergence_tests;
#[cfg(test)]
mod upgrade_tests;
#[cfg(test)]
mod workloads_tests;

pub use pravegacluster::{reconcile_pravegacluster, ReconcileOutcome};
