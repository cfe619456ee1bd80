//! # OneAgent Spec
//!
//! Specifications of the two managed resource kinds and their shared base.

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements, Toleration};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings shared by every agent resource kind
///
/// Covers how to reach the monitoring API and which network policy the
/// agent needs; the workload-specific settings live on [`OneAgentSpec`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BaseSpec {
    /// Monitoring API URL, e.g. `https://abc12345.live.dynatrace.com/api`
    pub api_url: String,
    /// Name of the secret holding `apiToken` and `paasToken`
    /// Defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    /// Disable TLS certificate verification towards the monitoring API
    #[serde(default)]
    pub skip_cert_check: bool,
    /// Proxy used by the operator and by the agents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySpec>,
    /// ConfigMap with custom CA certificates under the `certs` key
    #[serde(default, rename = "trustedCAs", skip_serializing_if = "Option::is_none")]
    pub trusted_cas: Option<String>,
    /// Create Istio ServiceEntries/VirtualServices for the monitoring API
    #[serde(default)]
    pub enable_istio: bool,
    /// Network zone the agents report in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_zone: Option<String>,
}

impl BaseSpec {
    /// Secret holding the tokens, falling back to the resource name
    #[must_use]
    pub fn tokens_secret_name(&self, resource_name: &str) -> String {
        match self.tokens.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => resource_name.to_string(),
        }
    }
}

/// Proxy configuration
///
/// Either an inline value or the name of a secret with a `proxy` key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<String>,
}

/// OneAgent Custom Resource Definition
///
/// Rolls out the full-stack agent as a DaemonSet, one pod per node.
///
/// # Example
///
/// ```yaml
/// apiVersion: dynatrace.com/v1alpha1
/// kind: OneAgent
/// metadata:
///   name: oneagent
///   namespace: dynatrace
/// spec:
///   apiUrl: https://ENVIRONMENTID.live.dynatrace.com/api
///   tokens: oneagent
///   tolerations:
///     - effect: NoSchedule
///       key: node-role.kubernetes.io/master
///       operator: Exists
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "OneAgent",
    group = "dynatrace.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::AgentStatus",
    shortname = "oa",
    printcolumn = r#"{"name":"ApiUrl", "type":"string", "jsonPath":".spec.apiUrl"}, {"name":"Tokens", "type":"string", "jsonPath":".status.tokens"}, {"name":"Version", "type":"string", "jsonPath":".status.version"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentSpec {
    #[serde(flatten)]
    pub base: BaseSpec,
    /// Explicit agent image; wins over every derived image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Pin the agent version instead of following the latest one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    /// Pull the version-tagged image from the tenant registry
    #[serde(default)]
    pub use_immutable_image: bool,
    /// Pull secret to use instead of the provisioned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_pull_secret: Option<String>,
    /// Never restart pods to roll out a newer agent version
    #[serde(default)]
    pub disable_agent_update: bool,
    /// How long to wait for a replaced pod to become ready
    #[serde(default = "default_wait_ready_seconds")]
    pub wait_ready_seconds: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_policy: Option<String>,
    /// Extra labels for the agent pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Extra installer arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment variables; reserved names are managed by the operator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Run with a reduced capability set instead of a privileged container
    #[serde(default)]
    pub use_unprivileged_mode: bool,
    /// Leave application injection to the mutating webhook
    #[serde(default)]
    pub webhook_injection: bool,
}

/// Default readiness timeout for replaced pods (seconds)
#[must_use]
pub fn default_wait_ready_seconds() -> u64 {
    crate::constants::DEFAULT_WAIT_READY_SECS
}

/// OneAgentApm Custom Resource Definition
///
/// Webhook-only variant: no DaemonSet is rolled out, the operator validates
/// the tokens, keeps the Istio configuration and records the latest code
/// module version for the injection webhook.
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "OneAgentApm",
    group = "dynatrace.com",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::AgentStatus",
    shortname = "oaapm",
    printcolumn = r#"{"name":"ApiUrl", "type":"string", "jsonPath":".spec.apiUrl"}, {"name":"Tokens", "type":"string", "jsonPath":".status.tokens"}, {"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OneAgentApmSpec {
    #[serde(flatten)]
    pub base: BaseSpec,
    /// Code modules image injected by the webhook
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Installer flavor (`default`, `musl`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    #[serde(default)]
    pub use_immutable_image: bool,
}
