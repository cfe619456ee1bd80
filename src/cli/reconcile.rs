//! # Reconcile Command
//!
//! Forces the next reconcile to run every throttled probe.
//!
//! Clearing the probe timestamps changes the status, which wakes the
//! controller; the following cycle finds every probe due.

use anyhow::{Context, Result};
use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use oneagent_operator::crd::AgentResource;
use serde_json::json;

/// Clear the probe timestamps of one resource of kind `K`
pub async fn reconcile_command<K: AgentResource>(client: Client, name: &str, ns: &str) -> Result<()> {
    let kind = K::kind(&());
    println!("🔄 Triggering reconciliation for {kind} '{ns}/{name}'...");

    let api: Api<K> = Api::namespaced(client, ns);
    api.get(name)
        .await
        .with_context(|| format!("Failed to get {kind} '{ns}/{name}'"))?;

    let patch = json!({
        "status": {
            "lastApiTokenProbeTimestamp": null,
            "lastPaasTokenProbeTimestamp": null,
            "lastImageVersionProbeTimestamp": null,
            "lastUpdateProbeTimestamp": null,
        }
    });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .with_context(|| format!("Failed to patch status of {kind} '{ns}/{name}'"))?;

    println!("   ✅ Probe timestamps cleared, the operator will reconcile shortly");
    Ok(())
}
