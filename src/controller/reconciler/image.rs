//! # Immutable Image
//!
//! Registry side of immutable-image mode: records the digest and version of
//! the image the agents run, and provisions the pull secret for the tenant
//! registry.

use super::status::{format_timestamp, probe_due};
use super::types::ReconcilerError;
use super::workload::{default_pull_secret_name, pull_secret_name, registry_host, resolve_image};
use crate::config::ControllerConfig;
use crate::crd::{AgentResource, OneAgentSpec};
use crate::dtclient::DtClient;
use crate::registry::{ImageDigest, ImageDigestResolver, ImageReference, RegistryCredentials};
use crate::store::ObjectStore;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";
const DOCKER_CONFIG_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Probe the registry for the image the agents run
///
/// Best effort: failures are logged and reported as "no change". Digest and
/// version are only written together, when the version moved.
pub async fn reconcile_image<R, S>(
    store: &S,
    resolver: &dyn ImageDigestResolver,
    resource: &mut R,
    spec: &OneAgentSpec,
    config: &ControllerConfig,
    now: DateTime<Utc>,
) -> bool
where
    R: AgentResource,
    S: ObjectStore,
{
    if !spec.use_immutable_image || spec.disable_agent_update {
        return false;
    }
    let last_probe = resource
        .agent_status()
        .and_then(|s| s.last_image_version_probe_timestamp.as_deref());
    if !probe_due(last_probe, config.image_probe_interval, now) {
        debug!("Image probe for {} not due yet", resource.name_any());
        return false;
    }
    resource.agent_status_mut().last_image_version_probe_timestamp = Some(format_timestamp(now));

    match probe_image(store, resolver, &*resource, spec, config).await {
        Ok(digest) => {
            let status = resource.agent_status_mut();
            if status.image_version.as_deref() == Some(digest.version.as_str()) {
                return false;
            }
            info!(
                "🔄 Image version for {} changed to {} ({})",
                resource.name_any(),
                digest.version,
                digest.digest
            );
            let status = resource.agent_status_mut();
            status.image_version = Some(digest.version);
            status.image_hash = Some(digest.digest);
            true
        }
        Err(e) => {
            warn!("⚠️  Failed to probe image for {}: {}", resource.name_any(), e);
            false
        }
    }
}

async fn probe_image<R, S>(
    store: &S,
    resolver: &dyn ImageDigestResolver,
    resource: &R,
    spec: &OneAgentSpec,
    config: &ControllerConfig,
) -> anyhow::Result<ImageDigest>
where
    R: AgentResource,
    S: ObjectStore,
{
    let image = resolve_image(spec, config.platform)?;
    let reference = ImageReference::parse(&image)?;
    let namespace = resource.namespace().unwrap_or_default();

    let mut credentials = None;
    if let Some(secret_name) = pull_secret_name(&resource.name_any(), spec) {
        let secret = store.get::<Secret>(&namespace, &secret_name).await?;
        let payload = secret
            .as_ref()
            .and_then(|s| s.data.as_ref())
            .and_then(|d| d.get(DOCKER_CONFIG_KEY));
        if let Some(payload) = payload {
            credentials = RegistryCredentials::from_docker_config(&payload.0, &reference.registry)?;
        } else {
            debug!("Pull secret {}/{} has no docker config yet", namespace, secret_name);
        }
    }

    Ok(resolver
        .resolve(&image, credentials.as_ref(), resource.base_spec().skip_cert_check)
        .await?)
}

/// `.dockerconfigjson` payload for the tenant registry
pub fn docker_config(registry: &str, username: &str, password: &str) -> Result<Vec<u8>, ReconcilerError> {
    let auth = general_purpose::STANDARD.encode(format!("{username}:{password}"));
    let config = serde_json::json!({
        "auths": {
            registry: {
                "username": username,
                "password": password,
                "auth": auth,
            }
        }
    });
    serde_json::to_vec(&config).map_err(|e| ReconcilerError::Other(e.into()))
}

/// Provision the pull secret for the tenant registry
///
/// Only applies in immutable-image mode without an explicit image or custom
/// pull secret. Returns whether the secret was created or updated.
pub async fn reconcile_pull_secret<R, S>(
    store: &S,
    client: &dyn DtClient,
    resource: &R,
    spec: &OneAgentSpec,
    paas_token: &str,
) -> Result<bool, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    if !super::workload::needs_provisioned_pull_secret(spec) {
        return Ok(false);
    }

    let namespace = resource.namespace().unwrap_or_default();
    let name = default_pull_secret_name(&resource.name_any());
    let registry = registry_host(&resource.base_spec().api_url)?;
    let connection_info = client.get_connection_info().await?;
    let payload = docker_config(&registry, &connection_info.tenant_uuid, paas_token)?;
    let data = BTreeMap::from([(DOCKER_CONFIG_KEY.to_string(), ByteString(payload))]);

    match store.get::<Secret>(&namespace, &name).await? {
        None => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                    owner_references: resource.controller_owner_ref(&()).map(|r| vec![r]),
                    ..ObjectMeta::default()
                },
                type_: Some(DOCKER_CONFIG_TYPE.to_string()),
                data: Some(data),
                ..Secret::default()
            };
            store.create(&secret).await?;
            info!("✅ Created pull secret {}/{}", namespace, name);
            Ok(true)
        }
        Some(existing) if existing.data.as_ref() != Some(&data) => {
            let mut secret = existing;
            secret.data = Some(data);
            secret.type_ = Some(DOCKER_CONFIG_TYPE.to_string());
            store.update(&secret).await?;
            info!("🔄 Updated pull secret {}/{}", namespace, name);
            Ok(true)
        }
        Some(_) => Ok(false),
    }
}
