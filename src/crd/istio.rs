//! # Istio Networking Types
//!
//! The subset of `networking.istio.io/v1alpha3` used to open egress from the
//! mesh towards the monitoring API. These CRDs are owned by Istio; the
//! operator only creates and deletes objects of these kinds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Istio ServiceEntry registering an external host with the mesh
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "ServiceEntry",
    group = "networking.istio.io",
    version = "v1alpha3",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntrySpec {
    /// DNS names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// CIDR addresses, used instead of hosts for IP endpoints
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    pub ports: Vec<ServiceEntryPort>,
    /// MESH_EXTERNAL or MESH_INTERNAL
    pub location: String,
    /// DNS, STATIC, NONE
    pub resolution: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ServiceEntryPort {
    pub name: String,
    pub number: u32,
    /// HTTP, HTTPS, TCP, ...
    pub protocol: String,
}

/// Istio VirtualService routing mesh traffic to an external host
#[derive(kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "VirtualService",
    group = "networking.istio.io",
    version = "v1alpha3",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<TlsRoute>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct HttpRoute {
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<PortMatch>,
    pub route: Vec<RouteDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct TlsRoute {
    #[serde(rename = "match")]
    pub matches: Vec<TlsMatch>,
    pub route: Vec<RouteDestination>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PortMatch {
    pub port: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsMatch {
    pub port: u32,
    pub sni_hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct RouteDestination {
    pub destination: Destination,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Destination {
    pub host: String,
    pub port: PortSelector,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PortSelector {
    pub number: u32,
}
