//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_IMAGE_KUBERNETES, DEFAULT_IMAGE_OPENSHIFT, DEFAULT_IMAGE_PROBE_INTERVAL_SECS,
    DEFAULT_ISTIO_REQUEUE_SECS, DEFAULT_MAX_CONCURRENT_RECONCILIATIONS, DEFAULT_METRICS_PORT,
    DEFAULT_POD_SPLAY_INTERVAL_MS, DEFAULT_RATE_LIMIT_REQUEUE_SECS,
    DEFAULT_RECONCILE_INTERVAL_SECS, DEFAULT_TOKEN_PROBE_INTERVAL_SECS,
    DEFAULT_UPDATE_PROBE_INTERVAL_SECS, DEFAULT_WAIT_READY_SECS, DEFAULT_WORKLOAD_REQUEUE_SECS,
};
use std::time::Duration;

/// Cluster distribution the operator runs on
///
/// Only used to pick the default agent image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    #[default]
    Kubernetes,
    OpenShift,
}

impl Platform {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "openshift" | "ocp" => Platform::OpenShift,
            _ => Platform::Kubernetes,
        }
    }

    /// Image used when the resource neither names an image nor uses immutable images
    #[must_use]
    pub fn default_image(self) -> &'static str {
        match self {
            Platform::Kubernetes => DEFAULT_IMAGE_KUBERNETES,
            Platform::OpenShift => DEFAULT_IMAGE_OPENSHIFT,
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Minimum time between two remote token verifications per token kind
    pub token_probe_interval: Duration,
    /// Minimum time between two agent version fan-outs over the fleet
    pub update_probe_interval: Duration,
    /// Minimum time between two registry digest lookups
    pub image_probe_interval: Duration,
    /// Poll interval while waiting for a replacement pod
    pub pod_splay_interval: Duration,
    /// Readiness timeout used when the resource does not set `waitReadySeconds`
    pub default_wait_ready: Duration,
    /// Steady-state requeue interval
    pub reconcile_interval: Duration,
    /// Requeue after Istio objects were created or removed
    pub istio_requeue: Duration,
    /// Requeue after the DaemonSet was created or replaced
    pub workload_requeue: Duration,
    /// Requeue after the monitoring API rate-limited us
    pub rate_limit_requeue: Duration,
    /// Distribution the operator runs on
    pub platform: Platform,
    /// Operator version stamped onto agent pods
    pub operator_version: String,
    /// Namespace the operator runs in
    pub operator_namespace: String,
    /// Namespace to watch, empty for all namespaces
    pub watch_namespace: Option<String>,
    /// Log format (json, text)
    pub log_format: String,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            token_probe_interval: Duration::from_secs(DEFAULT_TOKEN_PROBE_INTERVAL_SECS),
            update_probe_interval: Duration::from_secs(DEFAULT_UPDATE_PROBE_INTERVAL_SECS),
            image_probe_interval: Duration::from_secs(DEFAULT_IMAGE_PROBE_INTERVAL_SECS),
            pod_splay_interval: Duration::from_millis(DEFAULT_POD_SPLAY_INTERVAL_MS),
            default_wait_ready: Duration::from_secs(DEFAULT_WAIT_READY_SECS),
            reconcile_interval: Duration::from_secs(DEFAULT_RECONCILE_INTERVAL_SECS),
            istio_requeue: Duration::from_secs(DEFAULT_ISTIO_REQUEUE_SECS),
            workload_requeue: Duration::from_secs(DEFAULT_WORKLOAD_REQUEUE_SECS),
            rate_limit_requeue: Duration::from_secs(DEFAULT_RATE_LIMIT_REQUEUE_SECS),
            platform: Platform::Kubernetes,
            operator_version: env!("CARGO_PKG_VERSION").to_string(),
            operator_namespace: "dynatrace".to_string(),
            watch_namespace: None,
            log_format: "json".to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            token_probe_interval: env_secs_or("TOKEN_PROBE_INTERVAL_SECS", defaults.token_probe_interval),
            update_probe_interval: env_secs_or(
                "UPDATE_PROBE_INTERVAL_SECS",
                defaults.update_probe_interval,
            ),
            image_probe_interval: env_secs_or("IMAGE_PROBE_INTERVAL_SECS", defaults.image_probe_interval),
            pod_splay_interval: Duration::from_millis(env_var_or_default(
                "POD_SPLAY_INTERVAL_MS",
                DEFAULT_POD_SPLAY_INTERVAL_MS,
            )),
            default_wait_ready: env_secs_or("DEFAULT_WAIT_READY_SECS", defaults.default_wait_ready),
            reconcile_interval: env_secs_or("RECONCILE_INTERVAL_SECS", defaults.reconcile_interval),
            istio_requeue: env_secs_or("ISTIO_REQUEUE_SECS", defaults.istio_requeue),
            workload_requeue: env_secs_or("WORKLOAD_REQUEUE_SECS", defaults.workload_requeue),
            rate_limit_requeue: env_secs_or("RATE_LIMIT_REQUEUE_SECS", defaults.rate_limit_requeue),
            platform: std::env::var("PLATFORM")
                .map(|p| Platform::parse(&p))
                .unwrap_or_default(),
            operator_version: env_var_or_default_str("OPERATOR_VERSION", &defaults.operator_version),
            operator_namespace: env_var_or_default_str("POD_NAMESPACE", &defaults.operator_namespace),
            watch_namespace: std::env::var("WATCH_NAMESPACE")
                .ok()
                .filter(|ns| !ns.trim().is_empty()),
            log_format: env_var_or_default_str("LOG_FORMAT", &defaults.log_format),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read an environment variable holding whole seconds
fn env_secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_var_or_default(key, default.as_secs()))
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
