//! # Reconciler
//!
//! Core reconciliation logic for `OneAgent` and `OneAgentApm` resources.
//!
//! The reconciler:
//! - Validates the API and PaaS tokens and reports them through conditions
//! - Keeps Istio ServiceEntries and VirtualServices for the monitoring API
//! - Rolls out the agent DaemonSet and detects template drift by hash
//! - Probes the tenant registry in immutable-image mode
//! - Replaces outdated agent pods one node at a time
//! - Writes the resource status once per cycle
//!
//! Both kinds share one generic cycle ([`reconcile::reconcile_resource`]);
//! `OneAgentApm` simply has no workload, so the DaemonSet, image and fleet
//! steps are skipped for it.

pub mod credentials;
pub mod fleet;
pub mod image;
pub mod istio;
pub mod reconcile;
pub mod rollout;
pub mod status;
pub mod types;
pub mod workload;

// Re-export public API
pub use reconcile::{reconcile, reconcile_resource};
pub use types::{BackoffState, Reconciler, ReconcilerError};
