//! # Custom Resource Definitions
//!
//! CRD types for the OneAgent operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `OneAgent` / `OneAgentApm` specifications and the shared `BaseSpec`
//! - `status.rs` - Status types shared by both kinds (phase, instances, conditions)
//! - `resource.rs` - The `AgentResource` capability trait the reconciler is generic over
//! - `istio.rs` - Istio `ServiceEntry` / `VirtualService` types (foreign CRDs)

pub mod istio;
mod resource;
mod spec;
mod status;

pub use resource::AgentResource;
pub use spec::{
    default_wait_ready_seconds, BaseSpec, OneAgent, OneAgentApm, OneAgentApmSpec, OneAgentSpec,
    ProxySpec,
};
pub use status::{
    AgentInstance, AgentStatus, Condition, ConditionReason, Phase, TokenKind, CONDITION_FALSE,
    CONDITION_TRUE,
};
