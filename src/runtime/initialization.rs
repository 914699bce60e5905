//! # Initialization
//!
//! Controller initialization: rustls, tracing, metrics, HTTP servers, and
//! the Kubernetes client.

use crate::config::{ControllerConfig, LogFormat};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_servers, ServerState};
use crate::controller::store::KubeStore;
use crate::observability;
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "config_rollout_controller=info";

pub struct InitializationResult {
    pub client: Client,
    pub reconciler: Arc<Reconciler>,
    /// Readiness for `/readyz`
    pub server_state: Arc<ServerState>,
    /// Cancelled on SIGINT/SIGTERM
    pub shutdown: CancellationToken,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Initialize the controller runtime
///
/// # Errors
///
/// Returns an error if metrics cannot be registered or no Kubernetes client
/// can be created
pub async fn initialize(config: &ControllerConfig) -> Result<InitializationResult> {
    // Must run before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|existing| anyhow!("Failed to install rustls crypto provider: {existing:?}"))?;

    info!("Starting Config Rollout Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        "Label selector: {:?}, annotation: {}, namespace: {}",
        config.selector.to_string(),
        config.annotation_key,
        config.namespace.as_deref().unwrap_or("<all>")
    );
    info!(
        "Ignored ConfigMap keys: {:?}, ignored Secret keys: {:?}",
        config.exclusions.plain.keys().collect::<Vec<_>>(),
        config.exclusions.sensitive.keys().collect::<Vec<_>>()
    );
    match &config.leader_election {
        Some(election) => info!(
            "Leader election enabled (lease: {}, identity: {})",
            election.lease_name, election.identity
        ),
        None => info!("Leader election disabled"),
    }

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::default());
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone(), Arc::clone(&server_state));

    let metrics_addr = config.metrics_bind_address;
    let probe_addr = config.health_probe_bind_address;
    let server_state_clone = Arc::clone(&server_state);
    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) =
            start_servers(metrics_addr, probe_addr, server_state_clone, server_shutdown).await
        {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let store = Arc::new(KubeStore::new(client.clone()));
    let reconciler = Arc::new(
        Reconciler::new(store, config.convergence_settings())
            .with_backoff(config.backoff_min_secs, config.backoff_max_secs),
    );

    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
        shutdown,
        server_handle,
    })
}

fn spawn_signal_handler(shutdown: CancellationToken, server_state: Arc<ServerState>) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        server_state.set_ready(false);
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
