//! Common test utilities
//!
//! In-process fakes for the monitoring API and the image registry, plus
//! fixtures for the objects a reconcile reads from the store.

#![allow(dead_code, reason = "Not every test binary uses every helper")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use oneagent_operator::config::ControllerConfig;
use oneagent_operator::constants::{SCOPE_DATA_EXPORT, SCOPE_INSTALLER_DOWNLOAD};
use oneagent_operator::controller::reconciler::Reconciler;
use oneagent_operator::crd::{BaseSpec, OneAgent, OneAgentSpec};
use oneagent_operator::dtclient::{
    CommunicationHost, ConnectionInfo, DtClient, DtClientError, DtClientFactory, DtClientOptions,
};
use oneagent_operator::registry::{ImageDigest, ImageDigestResolver, RegistryCredentials, RegistryError};
use oneagent_operator::store::{MemoryStore, ObjectStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

pub const NAMESPACE: &str = "dynatrace";
pub const NAME: &str = "oneagent";
pub const API_URL: &str = "https://tenant.example.com/api";

static RUSTLS_INIT: Once = Once::new();

/// Initialize rustls crypto provider for tests
///
/// Uses a `Once` to ensure it's only called once per test binary.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test may have installed it already
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Scripted monitoring API
#[derive(Debug, Default)]
pub struct FakeDtClient {
    latest_version: Mutex<String>,
    host_versions: Mutex<HashMap<String, String>>,
    connection_info: Mutex<ConnectionInfo>,
    rate_limited: AtomicBool,
    unauthorized: AtomicBool,
    /// Scopes granted to every token; `None` grants all required scopes
    token_scopes: Mutex<Option<BTreeSet<String>>>,
    token_error: Mutex<Option<String>>,
    host_lookups: AtomicUsize,
    token_lookups: AtomicUsize,
}

impl FakeDtClient {
    pub fn new(latest_version: &str) -> Arc<Self> {
        let client = Self::default();
        client.set_latest_version(latest_version);
        Arc::new(client)
    }

    pub fn set_latest_version(&self, version: &str) {
        *self.latest_version.lock().unwrap() = version.to_string();
    }

    /// Version the host with `ip` reports; unknown IPs are "host not found"
    pub fn set_host_version(&self, ip: &str, version: &str) {
        self.host_versions
            .lock()
            .unwrap()
            .insert(ip.to_string(), version.to_string());
    }

    pub fn set_communication_hosts(&self, hosts: Vec<CommunicationHost>) {
        self.connection_info.lock().unwrap().communication_hosts = hosts;
    }

    /// Answer host lookups with 429
    pub fn set_rate_limited(&self, rate_limited: bool) {
        self.rate_limited.store(rate_limited, Ordering::SeqCst);
    }

    /// Answer token lookups with 401
    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.unauthorized.store(unauthorized, Ordering::SeqCst);
    }

    pub fn set_token_scopes(&self, scopes: &[&str]) {
        *self.token_scopes.lock().unwrap() = Some(scopes.iter().map(ToString::to_string).collect());
    }

    /// Answer token lookups with a server error carrying `message`
    pub fn set_token_error(&self, message: &str) {
        *self.token_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn host_lookups(&self) -> usize {
        self.host_lookups.load(Ordering::SeqCst)
    }

    pub fn token_lookups(&self) -> usize {
        self.token_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DtClient for FakeDtClient {
    async fn get_latest_agent_version(
        &self,
        _os: &str,
        _installer_type: &str,
    ) -> Result<String, DtClientError> {
        Ok(self.latest_version.lock().unwrap().clone())
    }

    async fn get_agent_version_for_ip(&self, ip: &str) -> Result<String, DtClientError> {
        self.host_lookups.fetch_add(1, Ordering::SeqCst);
        if self.rate_limited.load(Ordering::SeqCst) {
            return Err(DtClientError::RateLimited("Too Many Requests".to_string()));
        }
        self.host_versions
            .lock()
            .unwrap()
            .get(ip)
            .cloned()
            .ok_or_else(|| DtClientError::HostNotFound(ip.to_string()))
    }

    async fn get_token_scopes(&self, _token: &str) -> Result<BTreeSet<String>, DtClientError> {
        self.token_lookups.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(DtClientError::Unauthorized("Token Authentication failed".to_string()));
        }
        if let Some(message) = self.token_error.lock().unwrap().clone() {
            return Err(DtClientError::Server { code: 500, message });
        }
        let scopes = self.token_scopes.lock().unwrap().clone();
        Ok(scopes.unwrap_or_else(|| {
            BTreeSet::from([
                SCOPE_DATA_EXPORT.to_string(),
                SCOPE_INSTALLER_DOWNLOAD.to_string(),
            ])
        }))
    }

    async fn get_connection_info(&self) -> Result<ConnectionInfo, DtClientError> {
        Ok(self.connection_info.lock().unwrap().clone())
    }

    fn get_communication_host_for_client(&self) -> Result<CommunicationHost, DtClientError> {
        CommunicationHost::parse(API_URL)
    }
}

/// Hands out the same fake for every resource
#[derive(Debug)]
pub struct FakeDtClientFactory {
    client: Arc<FakeDtClient>,
}

impl DtClientFactory for FakeDtClientFactory {
    fn create(&self, _options: DtClientOptions) -> Result<Arc<dyn DtClient>, DtClientError> {
        Ok(Arc::clone(&self.client) as Arc<dyn DtClient>)
    }
}

/// Registry reporting a scripted digest and version for every image
#[derive(Debug)]
pub struct FakeImageResolver {
    published: Mutex<ImageDigest>,
    resolves: AtomicUsize,
}

impl FakeImageResolver {
    pub fn new(digest: &str, version: &str) -> Arc<Self> {
        Arc::new(Self {
            published: Mutex::new(ImageDigest {
                digest: digest.to_string(),
                version: version.to_string(),
            }),
            resolves: AtomicUsize::new(0),
        })
    }

    pub fn publish(&self, digest: &str, version: &str) {
        *self.published.lock().unwrap() = ImageDigest {
            digest: digest.to_string(),
            version: version.to_string(),
        };
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageDigestResolver for FakeImageResolver {
    async fn resolve(
        &self,
        _image: &str,
        _credentials: Option<&RegistryCredentials>,
        _skip_cert_check: bool,
    ) -> Result<ImageDigest, RegistryError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        Ok(self.published.lock().unwrap().clone())
    }
}

/// Config with short waits so replacement polling finishes quickly
pub fn test_config() -> ControllerConfig {
    ControllerConfig {
        pod_splay_interval: Duration::from_millis(10),
        default_wait_ready: Duration::from_secs(2),
        ..ControllerConfig::default()
    }
}

pub fn reconciler(store: &Arc<MemoryStore>, client: &Arc<FakeDtClient>) -> Reconciler<MemoryStore> {
    Reconciler::new(
        Arc::clone(store),
        Arc::new(FakeDtClientFactory {
            client: Arc::clone(client),
        }),
        FakeImageResolver::new("sha256:0123456789abcdef", "1.187.0.20200101-120000"),
        test_config(),
    )
}

pub fn oneagent() -> OneAgent {
    let mut resource = OneAgent::new(
        NAME,
        OneAgentSpec {
            base: BaseSpec {
                api_url: API_URL.to_string(),
                ..BaseSpec::default()
            },
            ..OneAgentSpec::default()
        },
    );
    resource.metadata.namespace = Some(NAMESPACE.to_string());
    resource
}

pub fn token_secret(api_token: &str, paas_token: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(NAME.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([
            ("apiToken".to_string(), ByteString(api_token.as_bytes().to_vec())),
            ("paasToken".to_string(), ByteString(paas_token.as_bytes().to_vec())),
        ])),
        ..Secret::default()
    }
}

/// Running and ready agent pod of the `oneagent` resource
pub fn agent_pod(name: &str, node: &str, ip: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            generate_name: Some(format!("{NAME}-")),
            labels: Some(BTreeMap::from([
                ("dynatrace".to_string(), "oneagent".to_string()),
                ("oneagent".to_string(), NAME.to_string()),
            ])),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            containers: vec![Container {
                name: "dynatrace-oneagent".to_string(),
                image: Some("docker.io/dynatrace/oneagent:latest".to_string()),
                ..Container::default()
            }],
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            host_ip: Some(ip.to_string()),
            container_statuses: Some(vec![ContainerStatus {
                name: "dynatrace-oneagent".to_string(),
                ready: true,
                ..ContainerStatus::default()
            }]),
            ..PodStatus::default()
        }),
    }
}

/// Store seeded with the `oneagent` resource and its token secret
pub fn seeded_store(secret: Option<&Secret>) -> Arc<MemoryStore> {
    let store = MemoryStore::new().with_cluster_id("cluster-1");
    store.insert(&oneagent()).unwrap();
    if let Some(secret) = secret {
        store.insert(secret).unwrap();
    }
    Arc::new(store)
}

/// Current state of the `oneagent` resource, as the watch would deliver it
pub async fn stored_oneagent(store: &MemoryStore) -> OneAgent {
    store
        .get::<OneAgent>(NAMESPACE, NAME)
        .await
        .unwrap()
        .expect("oneagent resource is seeded")
}
