//! # Istio Connectivity
//!
//! Keeps one ServiceEntry (plus a VirtualService for HTTP(S) hostnames) per
//! endpoint the agents must reach, and removes the ones no longer needed.
//!
//! Object names are derived from owner, protocol, host and port so that the
//! required set can be compared against what exists without reading specs.
//! Stale objects are found through the owner and role labels.

use super::types::ReconcilerError;
use crate::constants::{
    ISTIO_ROLE_API_URL, ISTIO_ROLE_COMMUNICATION_ENDPOINT, LABEL_ISTIO_OWNER, LABEL_ISTIO_ROLE,
};
use crate::crd::istio::{
    Destination, HttpRoute, PortMatch, PortSelector, RouteDestination, ServiceEntry,
    ServiceEntryPort, ServiceEntrySpec, TlsMatch, TlsRoute, VirtualService, VirtualServiceSpec,
};
use crate::crd::AgentResource;
use crate::dtclient::{CommunicationHost, DtClient};
use crate::observability::metrics;
use crate::store::{ObjectStore, StoreObject};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, info};

/// Deterministic object name for one endpoint of one owner
#[must_use]
pub fn build_object_name(owner: &str, host: &CommunicationHost) -> String {
    let digest = Sha256::digest(
        format!("{}-{}-{}-{}", owner, host.protocol, host.host, host.port).as_bytes(),
    );
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..32].to_string()
}

fn is_ip(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
}

fn object_meta<R: AgentResource>(resource: &R, name: &str, role: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: resource.namespace(),
        labels: Some(BTreeMap::from([
            (LABEL_ISTIO_OWNER.to_string(), resource.name_any()),
            (LABEL_ISTIO_ROLE.to_string(), role.to_string()),
        ])),
        owner_references: resource.controller_owner_ref(&()).map(|r| vec![r]),
        ..ObjectMeta::default()
    }
}

/// ServiceEntry admitting egress to `host`
#[must_use]
pub fn build_service_entry(meta: ObjectMeta, host: &CommunicationHost) -> ServiceEntry {
    let port = ServiceEntryPort {
        name: format!("{}-{}", host.protocol, host.port),
        number: host.port,
        protocol: host.protocol.to_uppercase(),
    };
    let spec = if is_ip(&host.host) {
        ServiceEntrySpec {
            addresses: vec![format!("{}/32", host.host)],
            ports: vec![port],
            location: "MESH_EXTERNAL".to_string(),
            resolution: "NONE".to_string(),
            ..ServiceEntrySpec::default()
        }
    } else {
        ServiceEntrySpec {
            hosts: vec![host.host.clone()],
            ports: vec![port],
            location: "MESH_EXTERNAL".to_string(),
            resolution: "DNS".to_string(),
            ..ServiceEntrySpec::default()
        }
    };
    ServiceEntry {
        metadata: meta,
        spec,
    }
}

/// VirtualService routing `host`; `None` for IPs and unsupported protocols
#[must_use]
pub fn build_virtual_service(meta: ObjectMeta, host: &CommunicationHost) -> Option<VirtualService> {
    if is_ip(&host.host) {
        return None;
    }
    let route = vec![RouteDestination {
        destination: Destination {
            host: host.host.clone(),
            port: PortSelector { number: host.port },
        },
    }];
    let spec = match host.protocol.as_str() {
        "https" => VirtualServiceSpec {
            hosts: vec![host.host.clone()],
            tls: vec![TlsRoute {
                matches: vec![TlsMatch {
                    port: host.port,
                    sni_hosts: vec![host.host.clone()],
                }],
                route,
            }],
            ..VirtualServiceSpec::default()
        },
        "http" => VirtualServiceSpec {
            hosts: vec![host.host.clone()],
            http: vec![HttpRoute {
                matches: vec![PortMatch { port: host.port }],
                route,
            }],
            ..VirtualServiceSpec::default()
        },
        other => {
            debug!("No VirtualService for protocol {}", other);
            return None;
        }
    };
    Some(VirtualService {
        metadata: meta,
        spec,
    })
}

/// Reconcile Istio objects for every endpoint of `resource`
///
/// Returns `true` when anything was created or deleted. A cluster without
/// Istio is a no-op.
pub async fn reconcile_istio<R, S>(
    store: &S,
    client: &dyn DtClient,
    resource: &R,
) -> Result<bool, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    if !store.kind_installed::<ServiceEntry>().await? {
        info!("Istio is not installed, skipping connectivity configuration");
        return Ok(false);
    }

    let api_host = client.get_communication_host_for_client()?;
    let mut changed = reconcile_role(store, resource, ISTIO_ROLE_API_URL, &[api_host]).await?;

    let connection_info = client.get_connection_info().await?;
    changed |= reconcile_role(
        store,
        resource,
        ISTIO_ROLE_COMMUNICATION_ENDPOINT,
        &connection_info.communication_hosts,
    )
    .await?;

    if changed {
        info!("🔄 Istio configuration for {} changed", resource.name_any());
    }
    Ok(changed)
}

async fn reconcile_role<R, S>(
    store: &S,
    resource: &R,
    role: &str,
    hosts: &[CommunicationHost],
) -> Result<bool, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let owner = resource.name_any();
    let namespace = resource.namespace().unwrap_or_default();
    let mut changed = false;
    let mut service_entries = BTreeSet::new();
    let mut virtual_services = BTreeSet::new();

    for host in hosts {
        let name = build_object_name(&owner, host);
        let meta = object_meta(resource, &name, role);

        if let Some(virtual_service) = build_virtual_service(meta.clone(), host) {
            virtual_services.insert(name.clone());
            changed |= create_if_missing(store, &namespace, &name, &virtual_service).await?;
        }
        let service_entry = build_service_entry(meta, host);
        service_entries.insert(name.clone());
        changed |= create_if_missing(store, &namespace, &name, &service_entry).await?;
    }

    let selector = format!("{}={},{}={}", LABEL_ISTIO_OWNER, owner, LABEL_ISTIO_ROLE, role);
    changed |= remove_stale::<ServiceEntry, S>(store, &namespace, &selector, &service_entries).await?;
    changed |= remove_stale::<VirtualService, S>(store, &namespace, &selector, &virtual_services).await?;
    Ok(changed)
}

async fn create_if_missing<K, S>(
    store: &S,
    namespace: &str,
    name: &str,
    obj: &K,
) -> Result<bool, ReconcilerError>
where
    K: StoreObject,
    S: ObjectStore,
{
    if store.get::<K>(namespace, name).await?.is_some() {
        return Ok(false);
    }
    store.create(obj).await?;
    info!("Created {} {}/{}", K::kind(&()), namespace, name);
    metrics::increment_istio_objects(&K::kind(&()), "create");
    Ok(true)
}

async fn remove_stale<K, S>(
    store: &S,
    namespace: &str,
    selector: &str,
    keep: &BTreeSet<String>,
) -> Result<bool, ReconcilerError>
where
    K: StoreObject,
    S: ObjectStore,
{
    let mut changed = false;
    for obj in store.list::<K>(namespace, selector).await? {
        let name = obj.name_any();
        if keep.contains(&name) {
            continue;
        }
        match store.delete::<K>(namespace, &name).await {
            Ok(()) => {
                info!("Removed stale {} {}/{}", K::kind(&()), namespace, name);
                metrics::increment_istio_objects(&K::kind(&()), "delete");
                changed = true;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(changed)
}
