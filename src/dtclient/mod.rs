//! # Monitoring API Client
//!
//! Logical view of the monitoring SaaS REST API used by the reconcilers.
//!
//! The reconcilers only ever talk to [`DtClient`]; the HTTP transport lives in
//! [`http::DtHttpClient`] and is created per reconcile through a
//! [`DtClientFactory`] so that tests can inject an in-process fake.

pub mod http;

pub use http::{DtHttpClient, HttpDtClientFactory};

use async_trait::async_trait;
use reqwest::Url;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the monitoring API
///
/// `Unauthorized` and `RateLimited` are distinguishable so that callers can
/// report the former through conditions and requeue quickly on the latter.
#[derive(Debug, Error)]
pub enum DtClientError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("host with ip {0} not found")]
    HostNotFound(String),
    #[error("agent version not set for host with ip {0}")]
    VersionUnset(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl DtClientError {
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DtClientError::RateLimited(_))
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, DtClientError::Unauthorized(_))
    }
}

/// One network endpoint the agents must reach
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommunicationHost {
    pub protocol: String,
    pub host: String,
    pub port: u32,
}

impl fmt::Display for CommunicationHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl CommunicationHost {
    /// Parse `scheme://host[:port][/path]`, defaulting the port by scheme
    pub fn parse(endpoint: &str) -> Result<Self, DtClientError> {
        let url = Url::parse(endpoint.trim())
            .map_err(|e| DtClientError::InvalidArgument(format!("{endpoint}: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| DtClientError::InvalidArgument(format!("{endpoint}: missing host")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| DtClientError::InvalidArgument(format!("{endpoint}: unknown port")))?;
        Ok(Self {
            protocol: url.scheme().to_string(),
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: u32::from(port),
        })
    }
}

/// Tenant connection details
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub tenant_uuid: String,
    pub communication_hosts: Vec<CommunicationHost>,
}

/// Operations the reconcilers need from the monitoring API
#[async_trait]
pub trait DtClient: Send + Sync {
    /// Latest agent version for an OS and installer type
    async fn get_latest_agent_version(
        &self,
        os: &str,
        installer_type: &str,
    ) -> Result<String, DtClientError>;

    /// Agent version reported by the host with the given IP address
    async fn get_agent_version_for_ip(&self, ip: &str) -> Result<String, DtClientError>;

    /// Scopes granted to a token
    async fn get_token_scopes(&self, token: &str) -> Result<BTreeSet<String>, DtClientError>;

    /// Tenant id and communication endpoints
    async fn get_connection_info(&self) -> Result<ConnectionInfo, DtClientError>;

    /// Endpoint of the API itself, parsed from the configured URL
    fn get_communication_host_for_client(&self) -> Result<CommunicationHost, DtClientError>;
}

/// Everything needed to build a client for one managed resource
#[derive(Clone, Default)]
pub struct DtClientOptions {
    pub api_url: String,
    pub api_token: String,
    pub paas_token: String,
    pub proxy: Option<String>,
    /// PEM bundle of additional trusted CAs
    pub trusted_certs: Option<String>,
    pub skip_cert_check: bool,
    pub network_zone: Option<String>,
}

impl fmt::Debug for DtClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtClientOptions")
            .field("api_url", &self.api_url)
            .field("api_token", &"***")
            .field("paas_token", &"***")
            .field("proxy", &self.proxy.as_ref().map(|_| "***"))
            .field("trusted_certs", &self.trusted_certs.is_some())
            .field("skip_cert_check", &self.skip_cert_check)
            .field("network_zone", &self.network_zone)
            .finish()
    }
}

/// Builds a [`DtClient`] from per-resource options
pub trait DtClientFactory: Send + Sync {
    fn create(&self, options: DtClientOptions) -> Result<Arc<dyn DtClient>, DtClientError>;
}
