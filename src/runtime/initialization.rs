//! # Initialization
//!
//! Operator startup: rustls setup, tracing, metrics, the probe/metrics
//! server, the admission webhook server, Kubernetes client setup, and a
//! CRD queryability check before the watch starts.

use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::constants::{
    env_var_or_default, DEFAULT_METRICS_PORT, DEFAULT_SERVER_POLL_INTERVAL_MS,
    DEFAULT_SERVER_STARTUP_TIMEOUT_SECS, DEFAULT_WEBHOOK_PORT,
};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::Decofile;
use crate::observability;
use crate::webhook::{start_webhook_server, WebhookContext};

/// Initialization result containing all necessary components for the operator
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// API for the Decofile CRD
    pub decofiles: Api<Decofile>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult").finish()
    }
}

/// Initialize the operator runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - Probe/metrics server startup
/// - Admission webhook server startup
/// - Kubernetes client creation
/// - Reconciler setup
/// - CRD queryability check
pub async fn initialize() -> Result<InitializationResult> {
    // Configure rustls crypto provider FIRST, before any other operations
    // Required for rustls 0.23+ when no default provider is set via features
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decofile_operator=info".into()),
        )
        .init();

    info!("Starting decofile operator");

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });

    // Start the probe/metrics server in a background task but wait for it to
    // bind before proceeding, so readiness probes pass immediately
    let metrics_port: u16 = env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT);
    let server_state_clone = server_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!("Probe/metrics server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, server_handle).await?;

    let client = Client::try_default().await?;

    // Admission endpoints run alongside the watch loop for the whole process
    // lifetime; TLS is terminated in front of this listener
    let webhook_port: u16 = env_var_or_default("WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT);
    let webhook_ctx = WebhookContext {
        client: client.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = start_webhook_server(webhook_port, webhook_ctx).await {
            error!("Admission webhook server error: {}", e);
        }
    });

    // Watch all namespaces so Decofiles can live next to their workloads
    let decofiles: Api<Decofile> = Api::all(client.clone());

    let reconciler = Arc::new(Reconciler::new(client.clone())?);

    check_crd_queryable(&decofiles).await;

    info!("Operator initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        decofiles,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to bind, bailing out early if its task dies
/// or the startup timeout elapses first
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: tokio::task::JoinHandle<()>,
) -> Result<()> {
    let poll_ready = async {
        while !server_state
            .is_ready
            .load(std::sync::atomic::Ordering::Relaxed)
        {
            tokio::time::sleep(std::time::Duration::from_millis(
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ))
            .await;
        }
    };

    tokio::select! {
        () = poll_ready => {
            info!("Probe/metrics server is ready and accepting connections");
            Ok(())
        }
        _ = server_handle => {
            Err(anyhow::anyhow!("probe/metrics server exited during startup"))
        }
        () = tokio::time::sleep(std::time::Duration::from_secs(
            DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
        )) => {
            Err(anyhow::anyhow!(
                "probe/metrics server not ready within {DEFAULT_SERVER_STARTUP_TIMEOUT_SECS}s"
            ))
        }
    }
}

/// Verify the CRD is installed and log what the watch will pick up.
///
/// The watch's initial list reconciles every existing resource, so nothing is
/// reconciled here; this is purely a startup diagnostic.
async fn check_crd_queryable(decofiles: &Api<Decofile>) {
    match decofiles.list(&ListParams::default().limit(500)).await {
        Ok(list) => {
            info!(
                "CRD is queryable, found {} existing Decofile resources",
                list.items.len()
            );
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - the watch will retry");
        }
    }
}
