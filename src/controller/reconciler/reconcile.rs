//! # Reconciliation Logic
//!
//! Top-level reconcile cycle shared by every agent resource kind.
//!
//! Steps run in a fixed order and the first terminal error ends the cycle:
//!
//! 1. Validate the API URL
//! 2. Tokens and monitoring API client
//! 3. Istio connectivity (requeue soon when it changed)
//! 4. DaemonSet drift and initial version (requeue when the DaemonSet changed)
//! 5. Immutable image probe and pull secret
//! 6. Update probe: desired version and fleet roll
//! 7. Phase from the DaemonSet readiness
//!
//! The status is written at most once per cycle, also when a step failed.
//! Rate limiting by the monitoring API is not an error to the caller; the
//! resource is simply looked at again a minute later.

use super::credentials::reconcile_credentials;
use super::fleet::reconcile_fleet;
use super::image::{reconcile_image, reconcile_pull_secret};
use super::istio::reconcile_istio;
use super::rollout::{ensure_version, reconcile_rollout, refresh_desired_version};
use super::status::{format_timestamp, persist_status, probe_due};
use super::types::{Reconciler, ReconcilerError};
use super::workload::{build_daemonset, WorkloadContext};
use crate::crd::{AgentResource, AgentStatus, OneAgentSpec, Phase};
use crate::dtclient::{CommunicationHost, DtClient};
use crate::observability::metrics;
use crate::store::ObjectStore;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Controller entry point
///
/// Errors are handled by the error policy of the watch loop.
#[allow(clippy::missing_errors_doc, reason = "Errors are documented on reconcile_resource")]
pub async fn reconcile<R, S>(resource: Arc<R>, ctx: Arc<Reconciler<S>>) -> Result<Action, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let key = format!(
        "{}/{}",
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    );
    let requeue = reconcile_resource(&*resource, &ctx).await?;
    ctx.reset_backoff(&key);
    Ok(Action::requeue(requeue))
}

/// Run one reconcile cycle and return when to look at the resource again
///
/// # Errors
///
/// Any terminal error other than rate limiting and validation, after the
/// accumulated status was persisted. When persisting fails too, both errors
/// are returned as [`ReconcilerError::StatusPersist`].
pub async fn reconcile_resource<R, S>(resource: &R, ctx: &Reconciler<S>) -> Result<Duration, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let kind = R::kind(&()).to_string();
    let span = info_span!(
        "reconcile",
        resource.name = %resource.name_any(),
        resource.namespace = %resource.namespace().unwrap_or_default(),
        resource.kind = %kind
    );

    async {
        let start = Instant::now();
        metrics::increment_reconciliations(&kind);
        info!("🔄 Reconciling {} {}", kind, resource.name_any());

        let now = Utc::now();
        let original = resource.agent_status().cloned();
        let mut working = resource.clone();

        let outcome = run_steps(&mut working, ctx, now).await;
        let result = finish(&mut working, original.as_ref(), ctx, &kind, now, outcome).await;

        metrics::observe_reconciliation_duration(&kind, start.elapsed().as_secs_f64());
        result
    }
    .instrument(span)
    .await
}

fn sets_error_phase(err: &ReconcilerError) -> bool {
    // Token problems are already explained by the token conditions
    !err.is_rate_limited()
        && !matches!(
            err,
            ReconcilerError::SecretNotFound(_) | ReconcilerError::TokenMissing { .. }
        )
}

async fn finish<R, S>(
    working: &mut R,
    original: Option<&AgentStatus>,
    ctx: &Reconciler<S>,
    kind: &str,
    now: DateTime<Utc>,
    outcome: Result<Option<Duration>, ReconcilerError>,
) -> Result<Duration, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let config = &ctx.config;
    let err = match outcome {
        Ok(requeue) => {
            persist_status(&*ctx.store, working, original, now).await?;
            let requeue = requeue.unwrap_or(config.reconcile_interval);
            debug!("Reconcile finished, next in {}s", requeue.as_secs());
            return Ok(requeue);
        }
        Err(err) => err,
    };

    if sets_error_phase(&err) {
        working.agent_status_mut().phase = Some(Phase::Error);
    }
    if let Err(status_error) = persist_status(&*ctx.store, working, original, now).await {
        error!("❌ Failed to persist status after error: {}", status_error);
        metrics::increment_reconciliation_errors(kind);
        return Err(ReconcilerError::StatusPersist {
            source: Box::new(err),
            status_error,
        });
    }

    if err.is_rate_limited() {
        warn!(
            "⚠️  Monitoring API rate limit hit, retrying in {}s",
            config.rate_limit_requeue.as_secs()
        );
        metrics::increment_rate_limited();
        metrics::increment_requeues_total("rate-limited");
        return Ok(config.rate_limit_requeue);
    }

    metrics::increment_reconciliation_errors(kind);
    if let ReconcilerError::Validation(message) = &err {
        // Nothing changes until the spec does
        error!("❌ Invalid {} {}: {}", kind, working.name_any(), message);
        return Ok(config.reconcile_interval);
    }
    Err(err)
}

fn validate<R: AgentResource>(resource: &R) -> Result<(), ReconcilerError> {
    let api_url = resource.base_spec().api_url.trim();
    if api_url.is_empty() {
        return Err(ReconcilerError::Validation("apiUrl is required".to_string()));
    }
    CommunicationHost::parse(api_url)
        .map_err(|e| ReconcilerError::Validation(format!("invalid apiUrl: {e}")))?;
    Ok(())
}

/// The steps of one cycle; `Some` asks for an early requeue
async fn run_steps<R, S>(
    working: &mut R,
    ctx: &Reconciler<S>,
    now: DateTime<Utc>,
) -> Result<Option<Duration>, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let store = &*ctx.store;
    let config = &ctx.config;

    validate(&*working)?;

    let credentials = reconcile_credentials(store, &*ctx.dt_clients, working, config, now).await?;
    let client = &*credentials.client;

    if working.base_spec().enable_istio {
        match reconcile_istio(store, client, &*working).await {
            Ok(true) => {
                metrics::increment_requeues_total("istio");
                return Ok(Some(config.istio_requeue));
            }
            Ok(false) => {}
            Err(e) if e.is_rate_limited() => return Err(e),
            Err(e) => warn!("⚠️  Istio reconciliation failed, continuing: {}", e),
        }
    }

    let workload_spec = working.workload_spec().cloned();
    if let Some(spec) = &workload_spec {
        let cluster_id = store.cluster_id().await?;
        let workload_ctx = WorkloadContext {
            cluster_id: &cluster_id,
            platform: config.platform,
            operator_version: &config.operator_version,
        };
        let desired = build_daemonset(&*working, spec, &workload_ctx)?;
        let action = reconcile_rollout(store, &desired).await?;
        ensure_version(working, client).await?;
        if action.changed() {
            metrics::increment_requeues_total("workload");
            return Ok(Some(config.workload_requeue));
        }

        reconcile_image(store, &*ctx.image_resolver, working, spec, config, now).await;
        reconcile_pull_secret(store, client, &*working, spec, &credentials.paas_token).await?;
    } else {
        ensure_version(working, client).await?;
    }

    let last_update_probe = working
        .agent_status()
        .and_then(|s| s.last_update_probe_timestamp.clone());
    if probe_due(last_update_probe.as_deref(), config.update_probe_interval, now) {
        working.agent_status_mut().last_update_probe_timestamp = Some(format_timestamp(now));
        let probe = update_probe(working, ctx, client, workload_spec.as_ref()).await;
        if let Err(e) = probe {
            if e.is_rate_limited() {
                // Retry the whole probe with the rate-limit requeue
                working.agent_status_mut().last_update_probe_timestamp = last_update_probe;
            }
            return Err(e);
        }
    } else {
        debug!("Update probe not due yet");
    }

    let phase = if workload_spec.is_some() {
        workload_phase(store, &*working).await?
    } else {
        Phase::Running
    };
    working.agent_status_mut().phase = Some(phase);
    Ok(None)
}

async fn update_probe<R, S>(
    working: &mut R,
    ctx: &Reconciler<S>,
    client: &dyn DtClient,
    workload_spec: Option<&OneAgentSpec>,
) -> Result<(), ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    refresh_desired_version(working, client).await?;
    if let Some(spec) = workload_spec {
        let replaced = reconcile_fleet(&*ctx.store, client, working, spec, &ctx.config).await?;
        if replaced > 0 {
            info!("✅ Replaced {} agent pod(s)", replaced);
        }
    }
    Ok(())
}

async fn workload_phase<R, S>(store: &S, resource: &R) -> Result<Phase, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let namespace = resource.namespace().unwrap_or_default();
    let daemonset: Option<DaemonSet> = store.get(&namespace, &resource.name_any()).await?;
    let phase = match daemonset.and_then(|ds| ds.status) {
        Some(status) if status.number_ready == status.desired_number_scheduled => Phase::Running,
        _ => Phase::Deploying,
    };
    Ok(phase)
}
