//! # Agent Resource Capability
//!
//! The reconciler is generic over this trait instead of duplicating its logic
//! per resource kind. Kinds differ only in which optional sub-reconcilers are
//! wired in, which is signalled by [`AgentResource::workload_spec`].

use crate::crd::{AgentStatus, BaseSpec, OneAgent, OneAgentApm, OneAgentSpec};
use crate::constants::{INSTALLER_TYPE_DEFAULT, INSTALLER_TYPE_PAAS};
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// Accessors every managed agent resource provides
pub trait AgentResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Installer type used for the latest-version query
    const INSTALLER_TYPE: &'static str;

    fn base_spec(&self) -> &BaseSpec;

    fn agent_status(&self) -> Option<&AgentStatus>;

    /// Status, created empty on first access
    fn agent_status_mut(&mut self) -> &mut AgentStatus;

    /// Workload settings; `None` for kinds that do not roll out a DaemonSet
    fn workload_spec(&self) -> Option<&OneAgentSpec> {
        None
    }
}

impl AgentResource for OneAgent {
    const INSTALLER_TYPE: &'static str = INSTALLER_TYPE_DEFAULT;

    fn base_spec(&self) -> &BaseSpec {
        &self.spec.base
    }

    fn agent_status(&self) -> Option<&AgentStatus> {
        self.status.as_ref()
    }

    fn agent_status_mut(&mut self) -> &mut AgentStatus {
        self.status.get_or_insert_with(AgentStatus::default)
    }

    fn workload_spec(&self) -> Option<&OneAgentSpec> {
        Some(&self.spec)
    }
}

impl AgentResource for OneAgentApm {
    const INSTALLER_TYPE: &'static str = INSTALLER_TYPE_PAAS;

    fn base_spec(&self) -> &BaseSpec {
        &self.spec.base
    }

    fn agent_status(&self) -> Option<&AgentStatus> {
        self.status.as_ref()
    }

    fn agent_status_mut(&mut self) -> &mut AgentStatus {
        self.status.get_or_insert_with(AgentStatus::default)
    }
}
