//! # Registry
//!
//! Resolves the current content digest and agent version of an image.
//!
//! Only the logical capability is used by the reconcilers
//! ([`ImageDigestResolver`]); [`HttpImageDigestResolver`] implements it on top
//! of the registry v2 manifest API with basic auth taken from a
//! `kubernetes.io/dockerconfigjson` pull secret.

use crate::constants::IMAGE_VERSION_LABEL;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.manifest.v1+json";
const DEFAULT_REGISTRY: &str = "docker.io";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),
    #[error("invalid pull secret: {0}")]
    InvalidPullSecret(String),
    #[error("registry returned {status} for {url}")]
    Status { status: u16, url: String },
    #[error("registry did not return a digest for {0}")]
    MissingDigest(String),
    #[error("registry request failed: {0}")]
    Transport(String),
}

/// Parsed `registry/repository:tag` image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, RegistryError> {
        let image = image.trim();
        if image.is_empty() || image.contains('@') {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let (registry, rest) = match image.split_once('/') {
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), image.to_string()),
        };

        // A colon after the last slash separates the tag
        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (rest.clone(), "latest".to_string()),
        };

        if repository.is_empty() || tag.is_empty() {
            return Err(RegistryError::InvalidReference(image.to_string()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            registry,
            repository,
            tag,
        })
    }
}

/// Basic-auth credentials for a registry
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl RegistryCredentials {
    /// Extract credentials for `registry` from a `.dockerconfigjson` payload
    pub fn from_docker_config(payload: &[u8], registry: &str) -> Result<Option<Self>, RegistryError> {
        let config: DockerConfig = serde_json::from_slice(payload)
            .map_err(|e| RegistryError::InvalidPullSecret(e.to_string()))?;
        let Some(entry) = config.auths.get(registry) else {
            return Ok(None);
        };

        if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
            return Ok(Some(Self {
                username: username.clone(),
                password: password.clone(),
            }));
        }

        let Some(auth) = entry.auth.as_deref() else {
            return Ok(None);
        };
        let decoded = general_purpose::STANDARD
            .decode(auth)
            .map_err(|e| RegistryError::InvalidPullSecret(e.to_string()))?;
        let decoded =
            String::from_utf8(decoded).map_err(|e| RegistryError::InvalidPullSecret(e.to_string()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidPullSecret("auth is not user:password".to_string()))?;
        Ok(Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        }))
    }
}

/// Digest and agent version of an image as currently published
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDigest {
    pub digest: String,
    pub version: String,
}

/// Resolves the current digest of an image reference
#[async_trait]
pub trait ImageDigestResolver: Send + Sync {
    async fn resolve(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
        skip_cert_check: bool,
    ) -> Result<ImageDigest, RegistryError>;
}

#[derive(Debug, Deserialize)]
struct Manifest {
    config: Option<Descriptor>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ImageConfigBlob {
    #[serde(default)]
    config: Option<ImageConfig>,
}

#[derive(Debug, Deserialize)]
struct ImageConfig {
    #[serde(default, rename = "Labels")]
    labels: Option<BTreeMap<String, String>>,
}

/// Registry v2 HTTP implementation of [`ImageDigestResolver`]
#[derive(Debug, Clone)]
pub struct HttpImageDigestResolver {
    verified: Client,
    insecure: Client,
}

impl HttpImageDigestResolver {
    pub fn new() -> Result<Self, RegistryError> {
        let build = |insecure: bool| {
            Client::builder()
                .timeout(Duration::from_secs(30))
                .danger_accept_invalid_certs(insecure)
                .build()
                .map_err(|e| RegistryError::Transport(e.to_string()))
        };
        Ok(Self {
            verified: build(false)?,
            insecure: build(true)?,
        })
    }

    fn get(
        client: &Client,
        url: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> reqwest::RequestBuilder {
        let request = client.get(url).header("Accept", MANIFEST_MEDIA_TYPES);
        match credentials {
            Some(c) => request.basic_auth(&c.username, Some(&c.password)),
            None => request,
        }
    }
}

#[async_trait]
impl ImageDigestResolver for HttpImageDigestResolver {
    async fn resolve(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
        skip_cert_check: bool,
    ) -> Result<ImageDigest, RegistryError> {
        let reference = ImageReference::parse(image)?;
        let client = if skip_cert_check { &self.insecure } else { &self.verified };
        let base = format!("https://{}/v2/{}", reference.registry, reference.repository);

        let manifest_url = format!("{}/manifests/{}", base, reference.tag);
        debug!("Resolving image digest: {}", manifest_url);
        let response = Self::get(client, &manifest_url, credentials)
            .send()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;
        if response.status() != StatusCode::OK {
            return Err(RegistryError::Status {
                status: response.status().as_u16(),
                url: manifest_url,
            });
        }

        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RegistryError::MissingDigest(image.to_string()))?;
        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| RegistryError::Transport(e.to_string()))?;

        let mut version = None;
        if let Some(config) = manifest.config {
            let blob_url = format!("{}/blobs/{}", base, config.digest);
            let blob = Self::get(client, &blob_url, credentials)
                .send()
                .await
                .map_err(|e| RegistryError::Transport(e.to_string()))?;
            if blob.status().is_success() {
                let blob: ImageConfigBlob = blob
                    .json()
                    .await
                    .map_err(|e| RegistryError::Transport(e.to_string()))?;
                version = blob
                    .config
                    .and_then(|c| c.labels)
                    .and_then(|mut labels| labels.remove(IMAGE_VERSION_LABEL));
            }
        }

        Ok(ImageDigest {
            digest,
            version: version.unwrap_or(reference.tag),
        })
    }
}
