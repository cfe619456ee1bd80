//! # Rollout
//!
//! Applies the desired DaemonSet and settles the agent version recorded in
//! the status.

use super::types::ReconcilerError;
use crate::constants::{ANNOTATION_TEMPLATE_HASH, OS_UNIX};
use crate::crd::{AgentResource, Phase};
use crate::dtclient::DtClient;
use crate::observability::metrics;
use crate::store::ObjectStore;
use k8s_openapi::api::apps::v1::DaemonSet;
use kube::ResourceExt;
use tracing::{debug, info};

/// What [`reconcile_rollout`] did to the DaemonSet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutAction {
    Created,
    Updated,
    Unchanged,
}

impl RolloutAction {
    #[must_use]
    pub fn changed(self) -> bool {
        self != RolloutAction::Unchanged
    }
}

fn template_hash_of(ds: &DaemonSet) -> Option<&str> {
    ds.annotations().get(ANNOTATION_TEMPLATE_HASH).map(String::as_str)
}

/// Create the DaemonSet or replace it when its template hash drifted
#[allow(clippy::missing_errors_doc, reason = "Errors are store errors")]
pub async fn reconcile_rollout<S: ObjectStore>(
    store: &S,
    desired: &DaemonSet,
) -> Result<RolloutAction, ReconcilerError> {
    let namespace = desired.namespace().unwrap_or_default();
    let name = desired.name_any();

    let Some(existing) = store.get::<DaemonSet>(&namespace, &name).await? else {
        store.create(desired).await?;
        metrics::increment_workload_operations("create");
        info!("✅ Created DaemonSet {}/{}", namespace, name);
        return Ok(RolloutAction::Created);
    };

    if template_hash_of(&existing) == template_hash_of(desired) {
        debug!("DaemonSet {}/{} is up to date", namespace, name);
        return Ok(RolloutAction::Unchanged);
    }

    let mut replacement = desired.clone();
    replacement.metadata.resource_version = existing.metadata.resource_version.clone();
    store.update(&replacement).await?;
    metrics::increment_workload_operations("update");
    info!("🔄 Updated DaemonSet {}/{} (template changed)", namespace, name);
    Ok(RolloutAction::Updated)
}

/// Make sure the status records the desired agent version
///
/// A pinned `agentVersion` wins; otherwise the latest version for the
/// resource's installer type is fetched. Also records the token secret
/// name. Returns whether the version was initialised.
pub async fn ensure_version<R: AgentResource>(
    resource: &mut R,
    client: &dyn DtClient,
) -> Result<bool, ReconcilerError> {
    let secret_name = resource.base_spec().tokens_secret_name(&resource.name_any());
    if resource.agent_status().and_then(|s| s.tokens.as_deref()) != Some(secret_name.as_str()) {
        resource.agent_status_mut().tokens = Some(secret_name);
    }

    let has_version = resource
        .agent_status()
        .and_then(|s| s.version.as_deref())
        .is_some_and(|v| !v.is_empty());
    if has_version {
        return Ok(false);
    }

    let version = desired_version(resource, client).await?;
    info!("Initial agent version for {} is {}", resource.name_any(), version);
    let status = resource.agent_status_mut();
    status.version = Some(version);
    status.phase = Some(Phase::Deploying);
    Ok(true)
}

/// Re-resolve the desired version during an update probe
///
/// Returns whether the recorded version changed.
pub async fn refresh_desired_version<R: AgentResource>(
    resource: &mut R,
    client: &dyn DtClient,
) -> Result<bool, ReconcilerError> {
    let version = desired_version(resource, client).await?;
    let current = resource.agent_status().and_then(|s| s.version.as_deref());
    if current == Some(version.as_str()) {
        return Ok(false);
    }
    info!(
        "🔄 Desired agent version for {} changed: {} -> {}",
        resource.name_any(),
        current.unwrap_or("<none>"),
        version
    );
    resource.agent_status_mut().version = Some(version);
    Ok(true)
}

async fn desired_version<R: AgentResource>(
    resource: &R,
    client: &dyn DtClient,
) -> Result<String, ReconcilerError> {
    let pinned = resource
        .workload_spec()
        .and_then(|spec| spec.agent_version.as_deref())
        .filter(|v| !v.is_empty());
    if let Some(pinned) = pinned {
        return Ok(pinned.to_string());
    }
    Ok(client
        .get_latest_agent_version(OS_UNIX, R::INSTALLER_TYPE)
        .await?)
}
