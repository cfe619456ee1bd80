//! # Fleet Version
//!
//! Observes the agent version on every node and replaces outdated pods one
//! node at a time.
//!
//! ## Protocol
//!
//! 1. List the agent pods of the resource and look up the agent version at
//!    each pod's host IP. A rate-limited lookup aborts the cycle before
//!    anything is written; any other lookup failure keeps the last known
//!    version of that node.
//! 2. A pod is outdated only when the desired version is strictly newer
//!    than the observed one.
//! 3. Outdated pods are deleted sequentially, ordered by node. After each
//!    deletion exactly one new ready pod has to show up on the same node
//!    before the next one is touched.

use super::types::ReconcilerError;
use super::workload::pod_label_selector;
use crate::config::ControllerConfig;
use crate::crd::{AgentInstance, AgentResource, OneAgentSpec, Phase};
use crate::dtclient::DtClient;
use crate::observability::metrics;
use crate::store::ObjectStore;
use crate::version;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .filter(|n| !n.is_empty())
}

fn host_ip(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.host_ip.as_deref())
        .unwrap_or_default()
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .is_some_and(|s| s.phase.as_deref() == Some("Running"))
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|containers| !containers.is_empty() && containers.iter().all(|c| c.ready))
}

/// Observe the fleet and roll outdated pods
///
/// Rebuilds `status.instances`. Returns the number of replaced pods. With
/// `disableAgentUpdate` the observation still runs but nothing is replaced.
pub async fn reconcile_fleet<R, S>(
    store: &S,
    client: &dyn DtClient,
    resource: &mut R,
    spec: &OneAgentSpec,
    config: &ControllerConfig,
) -> Result<usize, ReconcilerError>
where
    R: AgentResource,
    S: ObjectStore,
{
    let namespace = resource.namespace().unwrap_or_default();
    let selector = pod_label_selector(&resource.name_any());
    let pods: Vec<Pod> = store.list(&namespace, &selector).await?;

    let desired = resource
        .agent_status()
        .and_then(|s| s.version.clone())
        .unwrap_or_default();
    let previous = resource
        .agent_status()
        .map(|s| s.instances.clone())
        .unwrap_or_default();

    let mut instances = BTreeMap::new();
    let mut outdated: Vec<(String, String)> = Vec::new();
    for pod in &pods {
        let Some(node) = node_name(pod) else {
            debug!("Pod {} is not scheduled yet", pod.name_any());
            continue;
        };
        let ip = host_ip(pod);

        let observed = match client.get_agent_version_for_ip(ip).await {
            Ok(observed) => {
                if !desired.is_empty() && version::is_newer(&observed, &desired) {
                    outdated.push((node.to_string(), pod.name_any()));
                }
                observed
            }
            Err(e) if e.is_rate_limited() => {
                warn!("⚠️  Agent version lookup rate limited, aborting fleet update");
                return Err(e.into());
            }
            Err(e) => {
                let fallback = previous.get(node).map(|i| i.version.clone()).unwrap_or_default();
                warn!(
                    "⚠️  Agent version lookup for {} on {} failed, keeping '{}': {}",
                    ip, node, fallback, e
                );
                fallback
            }
        };

        instances.insert(
            node.to_string(),
            AgentInstance {
                pod_name: pod.name_any(),
                ip_address: ip.to_string(),
                version: observed,
            },
        );
    }

    let status = resource.agent_status_mut();
    status.instances = instances;
    if outdated.is_empty() {
        return Ok(0);
    }
    status.phase = Some(Phase::Deploying);

    if spec.disable_agent_update {
        info!(
            "{} outdated agent pod(s) for {}, automatic updates are disabled",
            outdated.len(),
            resource.name_any()
        );
        return Ok(0);
    }

    let timeout = match spec.wait_ready_seconds {
        0 => config.default_wait_ready,
        secs => Duration::from_secs(secs),
    };
    outdated.sort();
    info!(
        "🔄 Replacing {} outdated agent pod(s) for {} (desired version {})",
        outdated.len(),
        resource.name_any(),
        desired
    );

    let mut replaced = 0;
    for (node, pod_name) in outdated {
        info!("Deleting agent pod {} on node {}", pod_name, node);
        match store.delete::<Pod>(&namespace, &pod_name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("Pod {} already gone", pod_name),
            Err(e) => return Err(e.into()),
        }
        metrics::increment_pods_replaced();
        let replacement = wait_for_replacement(
            store,
            &namespace,
            &selector,
            &node,
            &pod_name,
            timeout,
            config.pod_splay_interval,
        )
        .await?;
        if let Some(instance) = resource.agent_status_mut().instances.get_mut(&node) {
            instance.pod_name = replacement.name_any();
            instance.ip_address = host_ip(&replacement).to_string();
        }
        replaced += 1;
    }
    Ok(replaced)
}

/// Wait until exactly one new ready pod runs on `node` and return it
///
/// More than one running candidate is an error right away, ready or not;
/// none that is ready until `timeout` is a rollout timeout.
pub async fn wait_for_replacement<S: ObjectStore>(
    store: &S,
    namespace: &str,
    selector: &str,
    node: &str,
    old_pod: &str,
    timeout: Duration,
    splay: Duration,
) -> Result<Pod, ReconcilerError> {
    let deadline = Instant::now() + timeout;
    loop {
        let pods: Vec<Pod> = store.list(namespace, selector).await?;
        let mut candidates: Vec<Pod> = pods
            .into_iter()
            .filter(|p| node_name(p) == Some(node))
            .filter(|p| p.name_any() != old_pod)
            .filter(is_running)
            .collect();

        if candidates.len() > 1 {
            return Err(ReconcilerError::Rollout(format!(
                "{} running pods found on node {}, expected one",
                candidates.len(),
                node
            )));
        }
        if let Some(pod) = candidates.pop().filter(is_ready) {
            info!("✅ Replacement pod {} is ready on node {}", pod.name_any(), node);
            return Ok(pod);
        }

        if Instant::now() + splay > deadline {
            metrics::increment_rollout_timeouts();
            return Err(ReconcilerError::Rollout(format!(
                "timed out after {}s waiting for a replacement of pod {} on node {}",
                timeout.as_secs(),
                old_pod,
                node
            )));
        }
        tokio::time::sleep(splay).await;
    }
}
