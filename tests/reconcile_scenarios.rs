//! # Reconcile Scenario Tests
//!
//! Full reconcile cycles against the in-process store and a scripted
//! monitoring API.
//!
//! These tests verify:
//! - First reconcile of a fresh resource
//! - Idempotence of a converged steady state
//! - Rate limiting during the fleet fan-out
//! - One-node-at-a-time replacement of outdated pods
//! - Token conditions for every failure reason, and probe throttling
//! - Create/remove of Istio objects and the early requeue after a change
//! - Status write failures after a failed step
//! - Image digest tracking in immutable-image mode

mod common;

use common::*;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ObjectMeta;
use oneagent_operator::constants::{
    ANNOTATION_TEMPLATE_HASH, ISTIO_ROLE_COMMUNICATION_ENDPOINT, LABEL_ISTIO_OWNER, LABEL_ISTIO_ROLE,
};
use chrono::Utc;
use oneagent_operator::controller::reconciler::fleet::reconcile_fleet;
use oneagent_operator::controller::reconciler::image::reconcile_image;
use oneagent_operator::controller::reconciler::istio::{
    build_object_name, build_service_entry, reconcile_istio,
};
use oneagent_operator::controller::reconciler::{reconcile_resource, ReconcilerError};
use oneagent_operator::crd::istio::ServiceEntry;
use oneagent_operator::crd::{AgentInstance, ConditionReason, OneAgent, Phase, TokenKind};
use oneagent_operator::dtclient::CommunicationHost;
use oneagent_operator::store::{MemoryStore, MutationOp, ObjectStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Store seeded with a customized `oneagent` resource and valid tokens
fn store_with(resource: &OneAgent) -> Arc<MemoryStore> {
    let store = MemoryStore::new().with_cluster_id("cluster-1");
    store.insert(resource).unwrap();
    store.insert(&token_secret("api-token", "paas-token")).unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_first_reconcile_records_version_and_creates_daemonset() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    let requeue = reconcile_resource(&resource, &ctx).await.unwrap();
    assert_eq!(requeue, ctx.config.workload_requeue);

    let status = stored_oneagent(&store).await.status.unwrap();
    assert_eq!(status.version.as_deref(), Some("1.187"));
    assert_eq!(status.phase, Some(Phase::Deploying));
    assert_eq!(status.tokens.as_deref(), Some(NAME));
    for kind in TokenKind::ALL {
        let condition = status.condition(kind).unwrap();
        assert!(condition.is_true(), "{:?} should be ready", kind);
        assert_eq!(condition.reason, ConditionReason::Ready);
    }

    let daemonset: DaemonSet = store.get(NAMESPACE, NAME).await.unwrap().unwrap();
    let hash = daemonset
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_TEMPLATE_HASH))
        .cloned()
        .unwrap_or_default();
    assert!(!hash.is_empty(), "DaemonSet must carry the template hash");
}

#[tokio::test]
async fn test_converged_reconcile_writes_nothing() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    // Create, then first update probe, then nothing left to do
    for _ in 0..3 {
        let resource = stored_oneagent(&store).await;
        reconcile_resource(&resource, &ctx).await.unwrap();
    }

    store.clear_mutations();
    let resource = stored_oneagent(&store).await;
    let requeue = reconcile_resource(&resource, &ctx).await.unwrap();

    assert_eq!(requeue, ctx.config.reconcile_interval);
    assert!(
        store.mutations().is_empty(),
        "Converged reconcile must not write, got {:?}",
        store.mutations()
    );
}

#[tokio::test]
async fn test_rate_limited_fan_out_requeues_without_touching_pods() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.2.3");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();

    store.insert(&agent_pod("oneagent-a", "n1", "10.0.0.1")).unwrap();
    store.insert(&agent_pod("oneagent-b", "n2", "10.0.0.2")).unwrap();
    client.set_rate_limited(true);

    let resource = stored_oneagent(&store).await;
    let requeue = reconcile_resource(&resource, &ctx).await.unwrap();

    assert_eq!(requeue, Duration::from_secs(60));
    assert!(store.mutations_of("Pod", MutationOp::Delete).is_empty());
    assert_eq!(client.host_lookups(), 1, "Fan-out must stop at the first 429");

    let status = stored_oneagent(&store).await.status.unwrap();
    assert!(
        status.last_update_probe_timestamp.is_none(),
        "A rate-limited update probe must run again on the next cycle"
    );
    assert_ne!(status.phase, Some(Phase::Error));
}

#[tokio::test]
async fn test_fleet_replaces_only_outdated_pod() {
    let store = seeded_store(None);
    store.set_respawn_pods(true);
    store.insert(&agent_pod("oneagent-a", "n1", "10.0.0.1")).unwrap();
    store.insert(&agent_pod("oneagent-b", "n2", "10.0.0.2")).unwrap();
    store.insert(&agent_pod("oneagent-c", "n3", "10.0.0.3")).unwrap();

    let client = FakeDtClient::new("1.2.3");
    client.set_host_version("10.0.0.1", "1.2.3");
    client.set_host_version("10.0.0.2", "0.1.2");

    let mut resource = oneagent();
    let status = resource.status.get_or_insert_with(Default::default);
    status.version = Some("1.2.3".to_string());
    status.instances.insert(
        "n3".to_string(),
        AgentInstance {
            pod_name: "oneagent-c".to_string(),
            ip_address: "10.0.0.3".to_string(),
            version: "outdated".to_string(),
        },
    );
    let spec = resource.spec.clone();

    let replaced = reconcile_fleet(&*store, &*client, &mut resource, &spec, &test_config())
        .await
        .unwrap();
    assert_eq!(replaced, 1);

    let deleted: Vec<String> = store
        .mutations_of("Pod", MutationOp::Delete)
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(deleted, vec!["oneagent-b".to_string()]);

    let status = resource.status.unwrap();
    let versions: BTreeMap<&str, &str> = status
        .instances
        .iter()
        .map(|(node, instance)| (node.as_str(), instance.version.as_str()))
        .collect();
    assert_eq!(
        versions,
        BTreeMap::from([("n1", "1.2.3"), ("n2", "0.1.2"), ("n3", "outdated")])
    );
    assert_eq!(status.phase, Some(Phase::Deploying));

    // The instance on n2 points at the replacement, not the deleted pod
    let n2 = &status.instances["n2"];
    assert_ne!(n2.pod_name, "oneagent-b");
    assert!(n2.pod_name.starts_with("oneagent-"));
    assert_eq!(n2.ip_address, "10.0.0.2");
}

#[tokio::test]
async fn test_fleet_replaces_pod_behind_short_pinned_version() {
    let store = seeded_store(None);
    store.set_respawn_pods(true);
    store.insert(&agent_pod("oneagent-a", "n1", "10.0.0.1")).unwrap();

    let client = FakeDtClient::new("1.187");
    client.set_host_version("10.0.0.1", "1.186.0.20200101-120000");

    let mut resource = oneagent();
    resource.status.get_or_insert_with(Default::default).version = Some("1.187".to_string());
    let spec = resource.spec.clone();

    let replaced = reconcile_fleet(&*store, &*client, &mut resource, &spec, &test_config())
        .await
        .unwrap();

    assert_eq!(replaced, 1);
    let deleted: Vec<String> = store
        .mutations_of("Pod", MutationOp::Delete)
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(deleted, vec!["oneagent-a".to_string()]);
}

#[tokio::test]
async fn test_disabled_updates_observe_but_do_not_replace() {
    let store = seeded_store(None);
    store.insert(&agent_pod("oneagent-b", "n2", "10.0.0.2")).unwrap();

    let client = FakeDtClient::new("1.2.3");
    client.set_host_version("10.0.0.2", "0.1.2");

    let mut resource = oneagent();
    resource.spec.disable_agent_update = true;
    resource.status.get_or_insert_with(Default::default).version = Some("1.2.3".to_string());
    let spec = resource.spec.clone();

    let replaced = reconcile_fleet(&*store, &*client, &mut resource, &spec, &test_config())
        .await
        .unwrap();

    assert_eq!(replaced, 0);
    assert!(store.mutations_of("Pod", MutationOp::Delete).is_empty());
    let status = resource.status.unwrap();
    assert_eq!(status.instances["n2"].version, "0.1.2");
    assert_eq!(status.phase, Some(Phase::Deploying));
}

#[tokio::test]
async fn test_replacement_that_never_becomes_ready_times_out() {
    let store = seeded_store(None);
    store.insert(&agent_pod("oneagent-b", "n2", "10.0.0.2")).unwrap();

    let client = FakeDtClient::new("1.2.3");
    client.set_host_version("10.0.0.2", "0.1.2");

    let mut resource = oneagent();
    resource.spec.wait_ready_seconds = 1;
    resource.status.get_or_insert_with(Default::default).version = Some("1.2.3".to_string());
    let spec = resource.spec.clone();

    let err = reconcile_fleet(&*store, &*client, &mut resource, &spec, &test_config())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcilerError::Rollout(ref m) if m.contains("timed out")));
    let remaining: Vec<Pod> = store.list(NAMESPACE, "dynatrace=oneagent").await.unwrap();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn test_empty_tokens_set_both_conditions_once() {
    let store = seeded_store(Some(&token_secret("", "")));
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    let err = reconcile_resource(&resource, &ctx).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::TokenMissing { .. }));

    let status = stored_oneagent(&store).await.status.unwrap();
    for kind in TokenKind::ALL {
        let condition = status.condition(kind).unwrap();
        assert!(!condition.is_true());
        assert_eq!(condition.reason, ConditionReason::TokenMissing);
    }
    assert_eq!(status.phase, None);

    // Identical conditions are not a status change
    store.clear_mutations();
    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap_err();
    assert!(store.mutations_of("OneAgent", MutationOp::UpdateStatus).is_empty());
}

#[tokio::test]
async fn test_missing_secret_reports_secret_not_found() {
    let store = seeded_store(None);
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    let err = reconcile_resource(&resource, &ctx).await.unwrap_err();
    assert!(matches!(err, ReconcilerError::SecretNotFound(ref s) if s == "dynatrace:oneagent"));

    let status = stored_oneagent(&store).await.status.unwrap();
    for kind in TokenKind::ALL {
        let condition = status.condition(kind).unwrap();
        assert_eq!(condition.reason, ConditionReason::SecretNotFound);
        assert!(condition.message.contains("dynatrace:oneagent"));
    }
    let daemonset: Option<DaemonSet> = store.get(NAMESPACE, NAME).await.unwrap();
    assert!(daemonset.is_none());
}

#[tokio::test]
async fn test_unauthorized_tokens_are_reported_through_conditions() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.187");
    client.set_unauthorized(true);
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();

    let status = stored_oneagent(&store).await.status.unwrap();
    for kind in TokenKind::ALL {
        assert_eq!(status.condition(kind).unwrap().reason, ConditionReason::Unauthorized);
    }
}

#[tokio::test]
async fn test_missing_scope_is_reported_per_token() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.187");
    client.set_token_scopes(&["DataExport"]);
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();

    let status = stored_oneagent(&store).await.status.unwrap();
    let install = status.condition(TokenKind::Install).unwrap();
    assert!(!install.is_true());
    assert_eq!(install.reason, ConditionReason::ScopeMissing);
    assert!(install.message.contains("InstallerDownload"));
    assert_eq!(
        status.condition(TokenKind::Telemetry).unwrap().reason,
        ConditionReason::Ready
    );
}

#[tokio::test]
async fn test_token_lookup_failure_carries_error_text() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.187");
    client.set_token_error("lookup backend unavailable");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();

    let status = stored_oneagent(&store).await.status.unwrap();
    for kind in TokenKind::ALL {
        let condition = status.condition(kind).unwrap();
        assert_eq!(condition.reason, ConditionReason::TokenError);
        assert!(
            condition.message.contains("lookup backend unavailable"),
            "unexpected message: {}",
            condition.message
        );
    }
}

#[tokio::test]
async fn test_token_with_whitespace_is_unauthorized_without_lookup() {
    let store = seeded_store(Some(&token_secret("api-token", " paas-token\n")));
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();

    let status = stored_oneagent(&store).await.status.unwrap();
    let install = status.condition(TokenKind::Install).unwrap();
    assert_eq!(install.reason, ConditionReason::Unauthorized);
    assert!(install.message.contains("whitespace"));
    assert!(status.last_paas_token_probe_timestamp.is_none());
    assert_eq!(client.token_lookups(), 1, "Only the API token is looked up");
}

#[tokio::test]
async fn test_token_verification_is_throttled() {
    let store = seeded_store(Some(&token_secret("api-token", "paas-token")));
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();
    assert_eq!(client.token_lookups(), 2);

    let resource = stored_oneagent(&store).await;
    reconcile_resource(&resource, &ctx).await.unwrap();
    assert_eq!(client.token_lookups(), 2, "Tokens were verified less than 5m ago");

    let status = stored_oneagent(&store).await.status.unwrap();
    for kind in TokenKind::ALL {
        assert!(status.condition(kind).unwrap().is_true());
    }
}

#[tokio::test]
async fn test_failed_status_write_wraps_step_error() {
    let store = seeded_store(None);
    store.set_fail_status_updates(true);
    let client = FakeDtClient::new("1.187");
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    let err = reconcile_resource(&resource, &ctx).await.unwrap_err();

    match err {
        ReconcilerError::StatusPersist { source, status_error } => {
            assert!(matches!(*source, ReconcilerError::SecretNotFound(_)));
            assert!(status_error.to_string().contains("rejected"));
        }
        other => panic!("expected StatusPersist, got {other:?}"),
    }
}

#[tokio::test]
async fn test_image_digest_follows_version_and_probe_is_throttled() {
    let store = seeded_store(None);
    let resolver = FakeImageResolver::new("sha256:aaa", "1.187.0.20200101-120000");
    let config = test_config();
    let mut resource = oneagent();
    resource.spec.use_immutable_image = true;
    let spec = resource.spec.clone();
    let start = Utc::now();
    let interval = chrono::Duration::from_std(config.image_probe_interval).unwrap();

    let changed = reconcile_image(&*store, &*resolver, &mut resource, &spec, &config, start).await;
    assert!(changed);
    let status = resource.status.clone().unwrap();
    assert_eq!(status.image_version.as_deref(), Some("1.187.0.20200101-120000"));
    assert_eq!(status.image_hash.as_deref(), Some("sha256:aaa"));

    // New digest for the same version is registry noise
    resolver.publish("sha256:bbb", "1.187.0.20200101-120000");
    let later = start + interval;
    let changed = reconcile_image(&*store, &*resolver, &mut resource, &spec, &config, later).await;
    assert!(!changed);
    assert_eq!(resource.status.as_ref().unwrap().image_hash.as_deref(), Some("sha256:aaa"));
    assert_eq!(resolver.resolves(), 2);

    // Not due again until a full interval has passed
    resolver.publish("sha256:ccc", "1.188.0.20200201-120000");
    let soon = later + chrono::Duration::seconds(1);
    let changed = reconcile_image(&*store, &*resolver, &mut resource, &spec, &config, soon).await;
    assert!(!changed);
    assert_eq!(resolver.resolves(), 2);

    let due = later + interval;
    let changed = reconcile_image(&*store, &*resolver, &mut resource, &spec, &config, due).await;
    assert!(changed);
    let status = resource.status.unwrap();
    assert_eq!(status.image_version.as_deref(), Some("1.188.0.20200201-120000"));
    assert_eq!(status.image_hash.as_deref(), Some("sha256:ccc"));
}

fn ip_host(ip: &str) -> CommunicationHost {
    CommunicationHost {
        protocol: "https".to_string(),
        host: ip.to_string(),
        port: 443,
    }
}

fn existing_service_entry(host: &CommunicationHost) -> ServiceEntry {
    let meta = ObjectMeta {
        name: Some(build_object_name(NAME, host)),
        namespace: Some(NAMESPACE.to_string()),
        labels: Some(BTreeMap::from([
            (LABEL_ISTIO_OWNER.to_string(), NAME.to_string()),
            (LABEL_ISTIO_ROLE.to_string(), ISTIO_ROLE_COMMUNICATION_ENDPOINT.to_string()),
        ])),
        ..ObjectMeta::default()
    };
    build_service_entry(meta, host)
}

#[tokio::test]
async fn test_istio_creates_missing_and_removes_stale_endpoints() {
    let (a, b, c) = (ip_host("10.0.0.1"), ip_host("10.0.0.2"), ip_host("10.0.0.3"));
    let store = seeded_store(None);
    store.install_kind::<ServiceEntry>();
    store.insert(&existing_service_entry(&a)).unwrap();
    store.insert(&existing_service_entry(&c)).unwrap();

    let client = FakeDtClient::new("1.187");
    client.set_communication_hosts(vec![a.clone(), b.clone()]);

    let resource = stored_oneagent(&store).await;
    let changed = reconcile_istio(&*store, &*client, &resource).await.unwrap();
    assert!(changed);

    let endpoint_names: BTreeSet<String> = [&a, &b, &c]
        .iter()
        .map(|h| build_object_name(NAME, h))
        .collect();
    let touched = |op: MutationOp| -> Vec<String> {
        store
            .mutations_of("ServiceEntry", op)
            .into_iter()
            .map(|m| m.name)
            .filter(|name| endpoint_names.contains(name))
            .collect()
    };
    assert_eq!(touched(MutationOp::Create), vec![build_object_name(NAME, &b)]);
    assert_eq!(touched(MutationOp::Delete), vec![build_object_name(NAME, &c)]);
    assert!(touched(MutationOp::Update).is_empty());

    let kept: Option<ServiceEntry> = store.get(NAMESPACE, &build_object_name(NAME, &a)).await.unwrap();
    assert!(kept.is_some());

    // Second run has nothing to do
    store.clear_mutations();
    let changed = reconcile_istio(&*store, &*client, &resource).await.unwrap();
    assert!(!changed);
    assert!(store.mutations().is_empty());
}

#[tokio::test]
async fn test_istio_is_skipped_when_not_installed() {
    let store = seeded_store(None);
    let client = FakeDtClient::new("1.187");
    client.set_communication_hosts(vec![ip_host("10.0.0.1")]);

    let resource = stored_oneagent(&store).await;
    let changed = reconcile_istio(&*store, &*client, &resource).await.unwrap();

    assert!(!changed);
    assert!(store.mutations().is_empty());
}

#[tokio::test]
async fn test_istio_change_requeues_before_rollout() {
    let mut resource = oneagent();
    resource.spec.base.enable_istio = true;
    let store = store_with(&resource);
    store.install_kind::<ServiceEntry>();

    let client = FakeDtClient::new("1.187");
    client.set_communication_hosts(vec![ip_host("10.0.0.1")]);
    let ctx = reconciler(&store, &client);

    let resource = stored_oneagent(&store).await;
    let requeue = reconcile_resource(&resource, &ctx).await.unwrap();

    assert_eq!(requeue, ctx.config.istio_requeue);
    assert!(!store.mutations_of("ServiceEntry", MutationOp::Create).is_empty());
    let daemonset: Option<DaemonSet> = store.get(NAMESPACE, NAME).await.unwrap();
    assert!(daemonset.is_none(), "No rollout while connectivity changes");

    // Once connectivity is stable the cycle goes on to the DaemonSet
    let resource = stored_oneagent(&store).await;
    let requeue = reconcile_resource(&resource, &ctx).await.unwrap();
    assert_eq!(requeue, ctx.config.workload_requeue);
    let daemonset: Option<DaemonSet> = store.get(NAMESPACE, NAME).await.unwrap();
    assert!(daemonset.is_some());
}
