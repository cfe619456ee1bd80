//! # Error Policy
//!
//! Error handling and backoff for failed reconciles.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError};
use crate::crd::AgentResource;
use crate::observability::metrics;
use crate::store::ObjectStore;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Delay used when the backoff state cannot be read
const FALLBACK_BACKOFF: Duration = Duration::from_secs(60);

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing resource does not
/// slow down the others. A successful reconcile removes it.
pub fn handle_reconciliation_error<R, S>(
    obj: Arc<R>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler<S>>,
) -> Action
where
    R: AgentResource,
    S: ObjectStore,
{
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name.as_str(),
        resource.namespace = namespace.as_str(),
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);

    let resource_key = format!("{}/{}", namespace, name);
    let (backoff, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states.entry(resource_key).or_insert_with(BackoffState::new);
            state.increment_error();
            (state.backoff.next_backoff(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff states: {}, using default backoff", e);
            (FALLBACK_BACKOFF, 0)
        }
    };

    info!(
        "🔄 Retrying with Fibonacci backoff: {}s (error count: {})",
        backoff.as_secs(),
        error_count
    );
    metrics::increment_requeues_total("error-backoff");
    Action::requeue(backoff)
}
