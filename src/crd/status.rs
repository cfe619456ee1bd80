//! # Agent Status
//!
//! Status types shared by `OneAgent` and `OneAgentApm`. Only the operator
//! writes these fields.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

/// Coarse lifecycle phase of a managed resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    /// Version unset or a rollout is pending
    Deploying,
    /// Every scheduled agent pod is ready
    Running,
    /// The most recent reconcile failed terminally
    Error,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Deploying => "Deploying",
            Phase::Running => "Running",
            Phase::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Status of an agent resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Agent version the fleet converges to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Node name -> agent pod running on it
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instances: BTreeMap<String, AgentInstance>,
    /// Last time the status was written (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_timestamp: Option<String>,
    /// Version of the immutable image last resolved from the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_version: Option<String>,
    /// Digest of the immutable image last resolved from the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_hash: Option<String>,
    /// Secret the tokens were read from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_api_token_probe_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_paas_token_probe_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_image_version_probe_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_probe_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl AgentStatus {
    /// Condition recorded for a token kind, if any
    #[must_use]
    pub fn condition(&self, kind: TokenKind) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.r#type == kind.condition_type())
    }

    /// Last remote verification of a token kind
    #[must_use]
    pub fn token_probe_timestamp(&self, kind: TokenKind) -> Option<&str> {
        match kind {
            TokenKind::Install => self.last_paas_token_probe_timestamp.as_deref(),
            TokenKind::Telemetry => self.last_api_token_probe_timestamp.as_deref(),
        }
    }

    /// Probe timestamp slot for a token kind
    pub fn token_probe_timestamp_mut(&mut self, kind: TokenKind) -> &mut Option<String> {
        match kind {
            TokenKind::Install => &mut self.last_paas_token_probe_timestamp,
            TokenKind::Telemetry => &mut self.last_api_token_probe_timestamp,
        }
    }
}

/// One agent pod, keyed by node name in [`AgentStatus::instances`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentInstance {
    pub pod_name: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub version: String,
}

/// The two tokens read from the token secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// PaaS token: downloads installers and images
    Install,
    /// API token: queries hosts and validates tokens
    Telemetry,
}

impl TokenKind {
    pub const ALL: [TokenKind; 2] = [TokenKind::Telemetry, TokenKind::Install];

    #[must_use]
    pub fn condition_type(self) -> &'static str {
        match self {
            TokenKind::Install => "PaaSToken",
            TokenKind::Telemetry => "APIToken",
        }
    }

    /// Key of the token inside the token secret
    #[must_use]
    pub fn secret_key(self) -> &'static str {
        match self {
            TokenKind::Install => crate::constants::SECRET_KEY_PAAS_TOKEN,
            TokenKind::Telemetry => crate::constants::SECRET_KEY_API_TOKEN,
        }
    }

    /// Scope the token must carry
    #[must_use]
    pub fn required_scope(self) -> &'static str {
        match self {
            TokenKind::Install => crate::constants::SCOPE_INSTALLER_DOWNLOAD,
            TokenKind::Telemetry => crate::constants::SCOPE_DATA_EXPORT,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Install => "install",
            TokenKind::Telemetry => "telemetry",
        }
    }
}

/// Machine-readable reason of a token condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionReason {
    Ready,
    SecretNotFound,
    TokenMissing,
    Unauthorized,
    ScopeMissing,
    TokenError,
}

impl fmt::Display for ConditionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionReason::Ready => "Ready",
            ConditionReason::SecretNotFound => "SecretNotFound",
            ConditionReason::TokenMissing => "TokenMissing",
            ConditionReason::Unauthorized => "Unauthorized",
            ConditionReason::ScopeMissing => "ScopeMissing",
            ConditionReason::TokenError => "TokenError",
        };
        f.write_str(s)
    }
}

/// Condition represents the validity of one token
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (`APIToken`, `PaaSToken`)
    pub r#type: String,
    /// Status of the condition (True, False)
    pub status: String,
    pub reason: ConditionReason,
    #[serde(default)]
    pub message: String,
    /// Last transition time (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == CONDITION_TRUE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_camel_case_without_empty_fields() {
        let status = AgentStatus {
            phase: Some(Phase::Deploying),
            version: Some("1.187".to_string()),
            ..AgentStatus::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value, serde_json::json!({"phase": "Deploying", "version": "1.187"}));
    }

    #[test]
    fn test_token_kind_mapping() {
        assert_eq!(TokenKind::Install.condition_type(), "PaaSToken");
        assert_eq!(TokenKind::Install.secret_key(), "paasToken");
        assert_eq!(TokenKind::Install.required_scope(), "InstallerDownload");
        assert_eq!(TokenKind::Telemetry.condition_type(), "APIToken");
        assert_eq!(TokenKind::Telemetry.secret_key(), "apiToken");
        assert_eq!(TokenKind::Telemetry.required_scope(), "DataExport");
    }
}
