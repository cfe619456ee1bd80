//! Monitoring API REST client
//!
//! reqwest-based implementation of [`DtClient`]. PaaS-token calls and
//! API-token calls both authenticate with an `Api-Token` authorization header.
//! A token lookup authenticates with the token it looks up, so each token's
//! validity is reported independently of the other.
//!
//! The host list backing [`DtClient::get_agent_version_for_ip`] is fetched
//! once per client instance, so a fleet lookup costs a single request.

use super::{
    CommunicationHost, ConnectionInfo, DtClient, DtClientError, DtClientFactory, DtClientOptions,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestVersionResponse {
    #[serde(default)]
    latest_agent_version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostEntry {
    #[serde(default)]
    ip_addresses: Vec<String>,
    #[serde(default)]
    agent_version: Option<AgentVersion>,
}

#[derive(Debug, Clone, Deserialize)]
struct AgentVersion {
    major: u32,
    minor: u32,
    revision: u32,
    #[serde(default)]
    timestamp: String,
}

impl AgentVersion {
    fn render(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.major, self.minor, self.revision, self.timestamp
        )
    }
}

#[derive(Debug, Serialize)]
struct TokenLookupRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenLookupResponse {
    #[serde(default)]
    scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionInfoResponse {
    #[serde(rename = "tenantUUID", default)]
    tenant_uuid: String,
    #[serde(default)]
    communication_endpoints: Vec<String>,
}

// ============================================================================
// Client
// ============================================================================

/// Monitoring API REST client
pub struct DtHttpClient {
    http_client: Client,
    api_url: String,
    api_token: String,
    paas_token: String,
    network_zone: Option<String>,
    hosts: Mutex<Option<Vec<HostEntry>>>,
}

impl std::fmt::Debug for DtHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DtHttpClient")
            .field("api_url", &self.api_url)
            .field("network_zone", &self.network_zone)
            .finish_non_exhaustive()
    }
}

impl DtHttpClient {
    /// Create a client for one managed resource
    ///
    /// # Errors
    /// Returns [`DtClientError::Config`] when the proxy URL or the trusted
    /// certificates cannot be used.
    pub fn new(options: DtClientOptions) -> Result<Self, DtClientError> {
        if options.api_url.trim().is_empty() {
            return Err(DtClientError::Config("apiUrl is empty".to_string()));
        }

        let mut builder = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(options.skip_cert_check);

        if let Some(proxy) = options.proxy.as_deref().filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| DtClientError::Config(format!("invalid proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        if let Some(pem) = options.trusted_certs.as_deref().filter(|p| !p.is_empty()) {
            let certs = reqwest::Certificate::from_pem_bundle(pem.as_bytes())
                .map_err(|e| DtClientError::Config(format!("invalid trusted CAs: {e}")))?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let http_client = builder
            .build()
            .map_err(|e| DtClientError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            api_url: options.api_url.trim_end_matches('/').to_string(),
            api_token: options.api_token,
            paas_token: options.paas_token,
            network_zone: options.network_zone.filter(|z| !z.is_empty()),
            hosts: Mutex::new(None),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str, token: &str) -> RequestBuilder {
        let url = format!("{}{}", self.api_url, path);
        debug!("{} {}", method, url);
        self.http_client
            .request(method, url)
            .header("Authorization", format!("Api-Token {token}"))
            .header("Accept", "application/json")
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, DtClientError> {
        let response = request
            .send()
            .await
            .map_err(|e| DtClientError::Transport(e.to_string()))?;
        let response = Self::check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DtClientError::InvalidResponse(e.to_string()))
    }

    async fn check_status(response: Response) -> Result<Response, DtClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let envelope = serde_json::from_str::<ErrorEnvelope>(&body).ok();
        let code = envelope
            .as_ref()
            .map(|e| e.error.code)
            .filter(|c| *c != 0)
            .unwrap_or_else(|| status.as_u16());
        let message = match envelope {
            Some(e) if !e.error.message.is_empty() => e.error.message,
            _ if body.is_empty() => status.canonical_reason().unwrap_or("unknown").to_string(),
            _ => body,
        };

        Err(match status {
            StatusCode::UNAUTHORIZED => DtClientError::Unauthorized(message),
            StatusCode::TOO_MANY_REQUESTS => DtClientError::RateLimited(message),
            _ => DtClientError::Server { code, message },
        })
    }

    async fn hosts(&self) -> Result<Vec<HostEntry>, DtClientError> {
        let mut cache = self.hosts.lock().await;
        if let Some(hosts) = cache.as_ref() {
            return Ok(hosts.clone());
        }

        let request = self
            .request(
                reqwest::Method::GET,
                "/v1/entity/infrastructure/hosts",
                &self.api_token,
            )
            .query(&[("includeDetails", "false")]);
        let hosts: Vec<HostEntry> = Self::send_json(request).await?;
        debug!("Fetched {} hosts from the monitoring API", hosts.len());
        *cache = Some(hosts.clone());
        Ok(hosts)
    }
}

#[async_trait]
impl DtClient for DtHttpClient {
    async fn get_latest_agent_version(
        &self,
        os: &str,
        installer_type: &str,
    ) -> Result<String, DtClientError> {
        if os.is_empty() || installer_type.is_empty() {
            return Err(DtClientError::InvalidArgument(
                "os and installer type must not be empty".to_string(),
            ));
        }

        let path = format!("/v1/deployment/installer/agent/{os}/{installer_type}/latest/metainfo");
        let mut request = self.request(reqwest::Method::GET, &path, &self.paas_token);
        if installer_type == crate::constants::INSTALLER_TYPE_DEFAULT {
            request = request.query(&[("flavor", "default"), ("arch", "all")]);
        }
        if let Some(zone) = self.network_zone.as_deref() {
            request = request.query(&[("networkZone", zone)]);
        }

        let response: LatestVersionResponse = Self::send_json(request).await?;
        if response.latest_agent_version.is_empty() {
            return Err(DtClientError::InvalidResponse(
                "latestAgentVersion is empty".to_string(),
            ));
        }
        Ok(response.latest_agent_version)
    }

    async fn get_agent_version_for_ip(&self, ip: &str) -> Result<String, DtClientError> {
        if ip.is_empty() {
            return Err(DtClientError::InvalidArgument("ip is empty".to_string()));
        }

        let hosts = self.hosts().await?;
        let host = hosts
            .iter()
            .find(|h| h.ip_addresses.iter().any(|a| a == ip))
            .ok_or_else(|| DtClientError::HostNotFound(ip.to_string()))?;
        host.agent_version
            .as_ref()
            .map(AgentVersion::render)
            .ok_or_else(|| DtClientError::VersionUnset(ip.to_string()))
    }

    async fn get_token_scopes(&self, token: &str) -> Result<BTreeSet<String>, DtClientError> {
        let request = self
            .request(reqwest::Method::POST, "/v1/tokens/lookup", token)
            .json(&TokenLookupRequest { token });
        let response: TokenLookupResponse = Self::send_json(request).await?;
        Ok(response.scopes.into_iter().collect())
    }

    async fn get_connection_info(&self) -> Result<ConnectionInfo, DtClientError> {
        let mut request = self.request(
            reqwest::Method::GET,
            "/v1/deployment/installer/agent/connectioninfo",
            &self.paas_token,
        );
        if let Some(zone) = self.network_zone.as_deref() {
            request = request.query(&[("networkZone", zone)]);
        }

        let response: ConnectionInfoResponse = Self::send_json(request).await?;
        let mut communication_hosts = Vec::with_capacity(response.communication_endpoints.len());
        for endpoint in &response.communication_endpoints {
            match CommunicationHost::parse(endpoint) {
                Ok(host) => communication_hosts.push(host),
                Err(e) => warn!("Skipping communication endpoint {}: {}", endpoint, e),
            }
        }

        Ok(ConnectionInfo {
            tenant_uuid: response.tenant_uuid,
            communication_hosts,
        })
    }

    fn get_communication_host_for_client(&self) -> Result<CommunicationHost, DtClientError> {
        CommunicationHost::parse(&self.api_url)
    }
}

/// Factory producing [`DtHttpClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDtClientFactory;

impl DtClientFactory for HttpDtClientFactory {
    fn create(&self, options: DtClientOptions) -> Result<Arc<dyn DtClient>, DtClientError> {
        Ok(Arc::new(DtHttpClient::new(options)?))
    }
}
