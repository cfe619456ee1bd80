//! # Credentials
//!
//! Validates the two tokens stored in the token secret and reports their
//! state through one condition per token kind.
//!
//! Remote verification is throttled per token kind by the token probe
//! interval. Authentication and scope problems are reported through
//! conditions only; a missing secret or a missing token fails the cycle.

use super::status::{format_timestamp, probe_due, set_condition};
use super::types::ReconcilerError;
use crate::config::ControllerConfig;
use crate::crd::{AgentResource, ConditionReason, TokenKind};
use crate::dtclient::{DtClient, DtClientError, DtClientFactory, DtClientOptions};
use crate::observability::metrics;
use crate::store::ObjectStore;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key of the proxy URL inside a `proxy.valueFrom` secret
const PROXY_SECRET_KEY: &str = "proxy";
/// Key of the PEM bundle inside the `trustedCAs` ConfigMap
const TRUSTED_CAS_KEY: &str = "certs";

/// Validated access to the monitoring API for one resource
#[derive(Clone)]
pub struct Credentials {
    pub client: Arc<dyn DtClient>,
    pub api_token: String,
    pub paas_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

enum TokenValue {
    Missing,
    Whitespace(String),
    Valid(String),
}

fn read_token(data: Option<&BTreeMap<String, k8s_openapi::ByteString>>, key: &str) -> TokenValue {
    let value = data
        .and_then(|d| d.get(key))
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default();
    if value.trim().is_empty() {
        TokenValue::Missing
    } else if value.trim() != value {
        TokenValue::Whitespace(value)
    } else {
        TokenValue::Valid(value)
    }
}

/// Validate the tokens of `resource` and build its monitoring API client
///
/// Conditions and probe timestamps are updated on the in-memory status even
/// when an error is returned; persisting them is up to the caller.
pub async fn reconcile_credentials<R, S>(
    store: &S,
    factory: &dyn DtClientFactory,
    resource: &mut R,
    config: &ControllerConfig,
    now: DateTime<Utc>,
) -> Result<Credentials, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let namespace = resource.namespace().unwrap_or_default();
    let secret_name = resource.base_spec().tokens_secret_name(&resource.name_any());
    let secret_ref = format!("{}:{}", namespace, secret_name);

    let Some(secret) = store.get::<Secret>(&namespace, &secret_name).await? else {
        warn!("⚠️  Token secret {} not found", secret_ref);
        let status = resource.agent_status_mut();
        for kind in TokenKind::ALL {
            set_condition(
                status,
                kind,
                false,
                ConditionReason::SecretNotFound,
                format!("Secret '{}' not found", secret_ref),
                now,
            );
        }
        return Err(ReconcilerError::SecretNotFound(secret_ref));
    };

    let mut tokens: BTreeMap<&'static str, String> = BTreeMap::new();
    let mut missing = Vec::new();
    let mut verify = Vec::new();
    for kind in TokenKind::ALL {
        let key = kind.secret_key();
        let status = resource.agent_status_mut();
        match read_token(secret.data.as_ref(), key) {
            TokenValue::Missing => {
                set_condition(
                    status,
                    kind,
                    false,
                    ConditionReason::TokenMissing,
                    format!("Token {} on secret {} missing", key, secret_ref),
                    now,
                );
                missing.push(key);
            }
            TokenValue::Whitespace(value) => {
                set_condition(
                    status,
                    kind,
                    false,
                    ConditionReason::Unauthorized,
                    format!(
                        "Token {} on secret {} contains leading or trailing whitespace",
                        key, secret_ref
                    ),
                    now,
                );
                tokens.insert(key, value.trim().to_string());
            }
            TokenValue::Valid(value) => {
                tokens.insert(key, value);
                verify.push(kind);
            }
        }
    }

    if !missing.is_empty() {
        return Err(ReconcilerError::TokenMissing {
            secret: secret_ref,
            tokens: missing.join(", "),
        });
    }

    let api_token = tokens.remove(TokenKind::Telemetry.secret_key()).unwrap_or_default();
    let paas_token = tokens.remove(TokenKind::Install.secret_key()).unwrap_or_default();
    let options = client_options(store, resource, &namespace, &api_token, &paas_token).await?;
    let client = factory.create(options)?;

    for kind in verify {
        let last_probe = resource
            .agent_status()
            .and_then(|s| s.token_probe_timestamp(kind));
        if !probe_due(last_probe, config.token_probe_interval, now) {
            debug!("Skipping {} token verification, probed at {:?}", kind.as_str(), last_probe);
            continue;
        }

        let token = match kind {
            TokenKind::Install => &paas_token,
            TokenKind::Telemetry => &api_token,
        };
        let result = client.get_token_scopes(token).await;

        let status = resource.agent_status_mut();
        *status.token_probe_timestamp_mut(kind) = Some(format_timestamp(now));
        let key = kind.secret_key();
        let (valid, reason, message) = match result {
            Err(DtClientError::Unauthorized(_)) => (
                false,
                ConditionReason::Unauthorized,
                format!("Token on secret {} unauthorized", secret_ref),
            ),
            Err(e) => (
                false,
                ConditionReason::TokenError,
                format!("error when querying token on secret {}: {}", secret_ref, e),
            ),
            Ok(scopes) if !scopes.contains(kind.required_scope()) => (
                false,
                ConditionReason::ScopeMissing,
                format!(
                    "Token {} on secret {} is missing scope {}",
                    key,
                    secret_ref,
                    kind.required_scope()
                ),
            ),
            Ok(_) => (true, ConditionReason::Ready, "Ready".to_string()),
        };

        metrics::increment_token_probes(kind.as_str(), &reason.to_string());
        if valid {
            info!("✅ {} token on secret {} is valid", kind.condition_type(), secret_ref);
        } else {
            warn!("⚠️  {}", message);
        }
        set_condition(status, kind, valid, reason, message, now);
    }

    Ok(Credentials {
        client,
        api_token,
        paas_token,
    })
}

async fn client_options<R, S>(
    store: &S,
    resource: &R,
    namespace: &str,
    api_token: &str,
    paas_token: &str,
) -> Result<DtClientOptions, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let base = resource.base_spec();

    let proxy = match &base.proxy {
        Some(proxy) if proxy.value_from.as_deref().is_some_and(|s| !s.is_empty()) => {
            let secret_name = proxy.value_from.as_deref().unwrap_or_default();
            let secret = store.get::<Secret>(namespace, secret_name).await?.ok_or_else(|| {
                ReconcilerError::Validation(format!("proxy secret {}:{} not found", namespace, secret_name))
            })?;
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(PROXY_SECRET_KEY))
                .map(|v| String::from_utf8_lossy(&v.0).trim().to_string())
        }
        Some(proxy) => proxy.value.clone(),
        None => None,
    };

    let trusted_certs = match base.trusted_cas.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => {
            let config_map = store.get::<ConfigMap>(namespace, name).await?.ok_or_else(|| {
                ReconcilerError::Validation(format!("trusted CAs ConfigMap {}:{} not found", namespace, name))
            })?;
            config_map.data.and_then(|mut d| d.remove(TRUSTED_CAS_KEY))
        }
        None => None,
    };

    Ok(DtClientOptions {
        api_url: base.api_url.clone(),
        api_token: api_token.to_string(),
        paas_token: paas_token.to_string(),
        proxy,
        trusted_certs,
        skip_cert_check: base.skip_cert_check,
        network_zone: base.network_zone.clone(),
    })
}
