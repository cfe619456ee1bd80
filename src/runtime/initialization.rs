//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::crd::{OneAgent, OneAgentApm};
use crate::dtclient::HttpDtClientFactory;
use crate::observability;
use crate::registry::HttpImageDigestResolver;
use crate::store::KubeStore;
use anyhow::{Context, Result};
use kube::api::{Api, ListParams};
use kube::{Client, CustomResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const SERVER_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const SERVER_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_LOG_FILTER: &str = "oneagent_operator=info";

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Reconciler context
    pub reconciler: Arc<Reconciler<KubeStore>>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .finish_non_exhaustive()
    }
}

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
#[allow(clippy::missing_errors_doc, reason = "Every step adds context to its error")]
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before anything opens a TLS connection
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        return Err(anyhow::anyhow!("Failed to install rustls crypto provider"));
    }

    let config = ControllerConfig::from_env();
    init_tracing(&config.log_format);

    info!("Starting OneAgent operator {}", config.operator_version);
    info!(
        "Build info: datetime={}, git_hash={}",
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_handle = tokio::spawn({
        let state = Arc::clone(&server_state);
        let port = config.metrics_port;
        async move {
            if let Err(e) = start_server(port, state).await {
                error!("HTTP server error: {}", e);
            }
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    check_crds(&client).await;

    let store = Arc::new(KubeStore::new(client.clone()));
    let image_resolver =
        HttpImageDigestResolver::new().context("Failed to create registry client")?;
    let reconciler = Arc::new(Reconciler::new(
        store,
        Arc::new(HttpDtClientFactory),
        Arc::new(image_resolver),
        config,
    ));

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        reconciler,
        server_state,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let start_time = Instant::now();
    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > SERVER_STARTUP_TIMEOUT {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                SERVER_STARTUP_TIMEOUT.as_secs()
            ));
        }
        tokio::time::sleep(SERVER_POLL_INTERVAL).await;
    }
}

/// Log whether both CRDs are served; the watch retries on its own if not
async fn check_crds(client: &Client) {
    let oneagents: Api<OneAgent> = Api::all(client.clone());
    match oneagents.list(&ListParams::default().limit(1)).await {
        Ok(list) => info!("CRD {} is queryable ({} resource(s) on first page)", OneAgent::crd_name(), list.items.len()),
        Err(e) => {
            error!("CRD {} is not queryable: {}. Is the CRD installed?", OneAgent::crd_name(), e);
            warn!("Continuing despite CRD check failure - the watch will retry");
        }
    }
    let apms: Api<OneAgentApm> = Api::all(client.clone());
    if let Err(e) = apms.list(&ListParams::default().limit(1)).await {
        warn!("CRD {} is not queryable: {}", OneAgentApm::crd_name(), e);
    }
}
