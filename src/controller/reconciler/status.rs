//! # Status
//!
//! Helpers for mutating the in-memory status and persisting it once per cycle.

use crate::crd::{AgentResource, AgentStatus, Condition, ConditionReason, TokenKind, CONDITION_FALSE, CONDITION_TRUE};
use crate::store::{ObjectStore, StoreError};
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::Duration;
use tracing::debug;

#[must_use]
pub fn format_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Whether a throttled probe may run again
///
/// Missing or unparsable timestamps count as "never probed".
#[must_use]
pub fn probe_due(last_probe: Option<&str>, interval: Duration, now: DateTime<Utc>) -> bool {
    let Some(last) = last_probe.and_then(|ts| DateTime::parse_from_rfc3339(ts).ok()) else {
        return true;
    };
    let Ok(interval) = chrono::Duration::from_std(interval) else {
        return true;
    };
    now >= last.with_timezone(&Utc) + interval
}

/// Set the condition of a token kind
///
/// Returns `false` and leaves the status untouched when an identical
/// condition is already present. The transition time only moves when the
/// validity flips.
pub fn set_condition(
    status: &mut AgentStatus,
    kind: TokenKind,
    valid: bool,
    reason: ConditionReason,
    message: impl Into<String>,
    now: DateTime<Utc>,
) -> bool {
    let message = message.into();
    let value = if valid { CONDITION_TRUE } else { CONDITION_FALSE };

    if let Some(existing) = status
        .conditions
        .iter_mut()
        .find(|c| c.r#type == kind.condition_type())
    {
        if existing.status == value && existing.reason == reason && existing.message == message {
            return false;
        }
        if existing.status != value {
            existing.last_transition_time = Some(format_timestamp(now));
        }
        existing.status = value.to_string();
        existing.reason = reason;
        existing.message = message;
        return true;
    }

    status.conditions.push(Condition {
        r#type: kind.condition_type().to_string(),
        status: value.to_string(),
        reason,
        message,
        last_transition_time: Some(format_timestamp(now)),
    });
    true
}

/// Persist the status of `resource` if it differs from `original`
///
/// Returns whether a write was issued.
pub async fn persist_status<R, S>(
    store: &S,
    resource: &mut R,
    original: Option<&AgentStatus>,
    now: DateTime<Utc>,
) -> Result<bool, StoreError>
where
    R: AgentResource,
    S: ObjectStore,
{
    if resource.agent_status() == original {
        debug!("Status unchanged, skipping update");
        return Ok(false);
    }
    resource.agent_status_mut().updated_timestamp = Some(format_timestamp(now));
    store.update_status(&*resource).await?;
    Ok(true)
}
