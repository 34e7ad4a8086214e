// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Service},
    policy::v1::PodDisruptionBudget,
};
use kube::{
    runtime::{controller::Action, watcher::Config as WatcherConfig, Controller},
    Api, Client, Resource, ResourceExt,
};
use pravega_operator::{
    config::OperatorConfig,
    constants::{ERROR_REQUEUE_DURATION_SECS, KIND_PRAVEGA_CLUSTER, TOKIO_WORKER_THREADS},
    context::OperatorContext,
    crd::PravegaCluster,
    health::{run_health_server, HealthState},
    metrics,
    reconcilers::reconcile_pravegacluster,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    let config = OperatorConfig::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("pravega-operator")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

/// Initialize logging.
///
/// Respects `RUST_LOG` (default `info`) and `RUST_LOG_FORMAT` (`json` or text).
fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(config: OperatorConfig) -> Result<()> {
    init_logging();

    info!("Starting Pravega operator");
    debug!(?config, "Operator configuration loaded");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let health = Arc::new(HealthState::new());
    let metrics_port = config.metrics_port;
    let health_server = tokio::spawn(run_health_server(health.clone(), metrics_port));

    let controller = run_pravegacluster_controller(client, config, health.clone());

    tokio::select! {
        () = controller => {
            error!("CRITICAL: PravegaCluster controller exited unexpectedly");
            anyhow::bail!("PravegaCluster controller exited unexpectedly")
        }
        result = health_server => {
            error!("CRITICAL: health server exited unexpectedly: {:?}", result);
            result??;
            anyhow::bail!("health server exited unexpectedly without error")
        }
        () = shutdown_signal() => {
            info!("Received shutdown signal, stopping controller");
        }
    }

    health.set_ready(false);
    Ok(())
}

/// API handle for `K`, cluster-wide or limited to the watched namespace.
fn watched_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    match namespace {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    }
}

/// Run the `PravegaCluster` controller.
async fn run_pravegacluster_controller(
    client: Client,
    config: OperatorConfig,
    health: Arc<HealthState>,
) {
    let namespace = config.watch_namespace.clone();
    match namespace.as_deref() {
        Some(ns) => info!("Starting PravegaCluster controller in namespace {}", ns),
        None => info!("Starting PravegaCluster controller for all namespaces"),
    }

    let ns = namespace.as_deref();
    let api = watched_api::<PravegaCluster>(&client, ns);
    let ctx = Arc::new(OperatorContext::from_client(client.clone(), config));

    let controller = Controller::new(api, WatcherConfig::default())
        .owns(watched_api::<Deployment>(&client, ns), WatcherConfig::default())
        .owns(watched_api::<StatefulSet>(&client, ns), WatcherConfig::default())
        .owns(watched_api::<ConfigMap>(&client, ns), WatcherConfig::default())
        .owns(watched_api::<Service>(&client, ns), WatcherConfig::default())
        .owns(
            watched_api::<PodDisruptionBudget>(&client, ns),
            WatcherConfig::default(),
        );

    health.set_ready(true);

    controller
        .run(reconcile_pravegacluster_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;
}

/// Reconcile wrapper for `PravegaCluster`
async fn reconcile_pravegacluster_wrapper(
    cluster: Arc<PravegaCluster>,
    ctx: Arc<OperatorContext>,
) -> Result<Action, ReconcileError> {
    let start = Instant::now();
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    debug!(
        namespace = %namespace,
        name = %name,
        "Reconcile wrapper called for PravegaCluster"
    );

    match reconcile_pravegacluster(&ctx, &namespace, &name).await {
        Ok(outcome) => {
            metrics::record_reconciliation_success(KIND_PRAVEGA_CLUSTER, start.elapsed());
            info!("Successfully reconciled PravegaCluster: {}/{}", namespace, name);
            Ok(outcome.into())
        }
        Err(e) => {
            metrics::record_reconciliation_error(KIND_PRAVEGA_CLUSTER, start.elapsed());
            error!("Failed to reconcile PravegaCluster {}/{}: {:#}", namespace, name, e);
            Err(e.into())
        }
    }
}

/// Error policy for the `PravegaCluster` controller
fn error_policy(
    cluster: Arc<PravegaCluster>,
    err: &ReconcileError,
    _ctx: Arc<OperatorContext>,
) -> Action {
    warn!(
        namespace = ?cluster.namespace(),
        name = %cluster.name_any(),
        "Reconcile failed, retrying in {}s: {}",
        ERROR_REQUEUE_DURATION_SECS,
        err
    );
    metrics::record_reconciliation_requeue(KIND_PRAVEGA_CLUSTER, "error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Resolve on SIGINT or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
