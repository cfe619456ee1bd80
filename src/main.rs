//! # OneAgent Operator
//!
//! Kubernetes operator that rolls out the OneAgent as a DaemonSet and keeps it
//! converged with the monitoring tenant.
//!
//! ## Overview
//!
//! For every `OneAgent` resource the operator:
//!
//! 1. **Validates tokens** - Checks the API and PaaS tokens and their scopes, reported as conditions
//! 2. **Configures Istio** - Creates ServiceEntries / VirtualServices so agents can reach the tenant
//! 3. **Rolls out the DaemonSet** - Detects template drift through a content hash
//! 4. **Updates agents** - Replaces pods running an older agent version, one node at a time
//!
//! `OneAgentApm` resources get token validation, Istio configuration and the
//! latest code module version recorded for the injection webhook.
//!
//! ## Features
//!
//! - **Rate-limit aware**: a 429 from the monitoring API requeues after a minute instead of failing
//! - **Immutable images**: version-tagged images from the tenant registry with a provisioned pull secret
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::Result;
use oneagent_operator::runtime::initialization::initialize;
use oneagent_operator::runtime::watch_loop::run_watch_loop;

#[tokio::main]
async fn main() -> Result<()> {
    let init = initialize().await?;
    run_watch_loop(init.client, init.reconciler, init.server_state).await
}
