//! # Status Command
//!
//! Command to show the detailed status of an agent resource.

use anyhow::{Context, Result};
use kube::{api::Api, Client, ResourceExt};
use oneagent_operator::crd::AgentResource;

/// Show detailed status of one resource of kind `K`
pub async fn status_command<K: AgentResource>(client: Client, name: &str, ns: &str) -> Result<()> {
    let kind = K::kind(&());
    println!("📊 Status for {kind} '{ns}/{name}'");
    println!();

    let api: Api<K> = Api::namespaced(client, ns);
    let resource = api
        .get(name)
        .await
        .with_context(|| format!("Failed to get {kind} '{ns}/{name}'"))?;

    println!("Resource Information:");
    println!("  Name: {}", resource.name_any());
    println!("  Namespace: {}", resource.namespace().unwrap_or_default());
    if let Some(uid) = resource.uid() {
        println!("  UID: {}", uid);
    }

    let base = resource.base_spec();
    println!();
    println!("Spec:");
    println!("  API URL: {}", base.api_url);
    println!("  Token Secret: {}", base.tokens_secret_name(&resource.name_any()));
    println!("  Istio: {}", base.enable_istio);
    if let Some(spec) = resource.workload_spec() {
        println!("  Immutable Image: {}", spec.use_immutable_image);
        println!("  Agent Updates: {}", if spec.disable_agent_update { "disabled" } else { "enabled" });
        if let Some(version) = &spec.agent_version {
            println!("  Pinned Version: {}", version);
        }
    }

    let Some(status) = resource.agent_status() else {
        println!();
        println!("Status: No status available (resource may not have been reconciled yet)");
        return Ok(());
    };

    println!();
    println!("Status:");
    if let Some(phase) = status.phase {
        println!("  Phase: {}", phase);
    }
    if let Some(version) = &status.version {
        println!("  Version: {}", version);
    }
    if let Some(image_version) = &status.image_version {
        println!(
            "  Image: {} ({})",
            image_version,
            status.image_hash.as_deref().unwrap_or("-")
        );
    }
    if let Some(updated) = &status.updated_timestamp {
        println!("  Updated: {}", updated);
    }

    if !status.instances.is_empty() {
        println!();
        println!("Instances:");
        for (node, instance) in &status.instances {
            println!(
                "  {}: {} ({}) version {}",
                node, instance.pod_name, instance.ip_address, instance.version
            );
        }
    }

    if !status.conditions.is_empty() {
        println!();
        println!("Conditions:");
        for condition in &status.conditions {
            println!("  {}: {}", condition.r#type, condition.status);
            println!("    Reason: {}", condition.reason);
            println!("    Message: {}", condition.message);
            if let Some(last_transition_time) = &condition.last_transition_time {
                println!("    Last Transition: {}", last_transition_time);
            }
        }
    }

    Ok(())
}
