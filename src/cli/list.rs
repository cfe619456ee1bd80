//! # List Command
//!
//! Command to list agent resources.

use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client, ResourceExt};
use oneagent_operator::crd::{AgentResource, TokenKind};

/// `True` when both token conditions are true, `False` when any is false
fn tokens_ready<K: AgentResource>(resource: &K) -> &'static str {
    let Some(status) = resource.agent_status() else {
        return "Unknown";
    };
    let conditions: Vec<_> = TokenKind::ALL
        .iter()
        .map(|kind| status.condition(*kind))
        .collect();
    if conditions.iter().any(Option::is_none) {
        "Unknown"
    } else if conditions.iter().flatten().all(|c| c.is_true()) {
        "True"
    } else {
        "False"
    }
}

/// List resources of kind `K`
pub async fn list_command<K: AgentResource>(client: Client, namespace: Option<&str>) -> Result<()> {
    let kind = K::kind(&());
    let api: Api<K> = if let Some(ns) = namespace {
        println!("Listing {kind} resources in namespace '{ns}'...");
        Api::namespaced(client, ns)
    } else {
        println!("Listing {kind} resources in all namespaces...");
        Api::all(client)
    };

    let resources = api
        .list(&ListParams::default())
        .await
        .with_context(|| format!("Failed to list {kind} resources"))?;

    if resources.items.is_empty() {
        println!("No {kind} resources found.");
        return Ok(());
    }

    println!(
        "\n{:<30} {:<20} {:<12} {:<25} {:<12}",
        "NAME", "NAMESPACE", "PHASE", "VERSION", "TOKENS"
    );
    println!("{}", "-".repeat(100));

    for resource in &resources.items {
        let name = resource.name_any();
        let ns = resource.namespace().unwrap_or_default();
        let status = resource.agent_status();
        let phase = status
            .and_then(|s| s.phase)
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let version = status.and_then(|s| s.version.as_deref()).unwrap_or("-");
        let tokens = tokens_ready(resource);

        println!("{name:<30} {ns:<20} {phase:<12} {version:<25} {tokens:<12}");
    }

    Ok(())
}
