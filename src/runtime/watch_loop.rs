//! # Watch Loop
//!
//! One controller per resource kind. `OneAgent` also owns its DaemonSets so
//! that a deleted or edited DaemonSet is put back right away.

use crate::constants::{LABEL_APP, LABEL_APP_VALUE};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::{AgentResource, OneAgent, OneAgentApm};
use crate::runtime::error_policy::handle_reconciliation_error;
use crate::store::KubeStore;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::api::Api;
use kube::Client;
use kube_runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn api<K: AgentResource>(client: &Client, namespace: Option<&str>) -> Api<K> {
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the controllers until a shutdown signal arrives
#[allow(clippy::missing_errors_doc, reason = "Controllers log their own errors")]
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler<KubeStore>>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let watch_namespace = reconciler.config.watch_namespace.clone();
    let controller_config =
        controller::Config::default().concurrency(reconciler.config.max_concurrent_reconciliations);
    match watch_namespace.as_deref() {
        Some(ns) => info!("Watching agent resources in namespace {}", ns),
        None => info!("Watching agent resources in all namespaces"),
    }

    let daemonsets: Api<DaemonSet> = match watch_namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let owned_selector = format!("{}={}", LABEL_APP, LABEL_APP_VALUE);

    let oneagents = Controller::new(
        api::<OneAgent>(&client, watch_namespace.as_deref()),
        watcher::Config::default().any_semantic(),
    )
    .owns(daemonsets, watcher::Config::default().labels(&owned_selector))
    .with_config(controller_config.clone())
    .shutdown_on_signal()
    .run(
        reconcile::<OneAgent, KubeStore>,
        handle_reconciliation_error::<OneAgent, KubeStore>,
        Arc::clone(&reconciler),
    )
    .for_each(|result| {
        match result {
            Ok((obj, action)) => debug!(resource = %obj, action = ?action, "watch.event.reconciled"),
            Err(e) => warn!("OneAgent controller stream error: {}", e),
        }
        futures::future::ready(())
    });

    let apms = Controller::new(
        api::<OneAgentApm>(&client, watch_namespace.as_deref()),
        watcher::Config::default().any_semantic(),
    )
    .with_config(controller_config)
    .shutdown_on_signal()
    .run(
        reconcile::<OneAgentApm, KubeStore>,
        handle_reconciliation_error::<OneAgentApm, KubeStore>,
        Arc::clone(&reconciler),
    )
    .for_each(|result| {
        match result {
            Ok((obj, action)) => debug!(resource = %obj, action = ?action, "watch.event.reconciled"),
            Err(e) => warn!("OneAgentApm controller stream error: {}", e),
        }
        futures::future::ready(())
    });

    info!("Starting controller watch loops...");
    futures::join!(oneagents, apms);

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}
