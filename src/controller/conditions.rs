//! # Conditions
//!
//! Upsert-by-type helpers over a resource's status conditions, following the
//! Kubernetes API conventions (at most one condition per type).

use crate::crd::{Condition, ConditionStatus, ResourceStatus};
use chrono::Utc;
use std::str::FromStr;

pub const CONDITION_READY: &str = "Ready";

// Reasons
pub const REASON_CREATED: &str = "Created";
pub const REASON_SYNCED: &str = "Synced";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";
pub const REASON_CREDENTIALS_ERROR: &str = "CredentialsError";
pub const REASON_CONNECTION_FAILED: &str = "ConnectionFailed";
pub const REASON_BROKER_ERROR: &str = "BrokerError";
pub const REASON_PARENT_NOT_READY: &str = "ParentNotReady";
pub const REASON_STORE_ERROR: &str = "StoreError";
pub const REASON_DELETE_FAILED: &str = "DeleteFailed";
pub const REASON_RETRIES_EXHAUSTED: &str = "RetriesExhausted";

/// How `lastTransitionTime` is treated when a condition is replaced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Keep the existing timestamp while the status is unchanged
    #[default]
    PreserveOnSameStatus,
    /// Replace the whole entry, timestamp included
    AlwaysRefresh,
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "preserve" => Ok(TransitionPolicy::PreserveOnSameStatus),
            "refresh" => Ok(TransitionPolicy::AlwaysRefresh),
            other => Err(format!(
                "invalid condition transition policy {other:?} (expected \"preserve\" or \"refresh\")"
            )),
        }
    }
}

/// Build a condition stamped with the current time
#[must_use]
pub fn build_condition(
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status,
        last_transition_time: Utc::now().to_rfc3339(),
        reason: reason.to_string(),
        message: message.to_string(),
    }
}

/// Replace the condition of the same type in place, or append it
#[must_use]
pub fn upsert_condition(
    mut conditions: Vec<Condition>,
    new: Condition,
    policy: TransitionPolicy,
) -> Vec<Condition> {
    match conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        Some(existing)
            if policy == TransitionPolicy::PreserveOnSameStatus
                && existing.status == new.status =>
        {
            existing.reason = new.reason;
            existing.message = new.message;
        }
        Some(existing) => *existing = new,
        None => conditions.push(new),
    }
    conditions
}

#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Whether the status carries `Ready=True`
#[must_use]
pub fn is_ready(status: Option<&ResourceStatus>) -> bool {
    status
        .and_then(|s| find_condition(&s.conditions, CONDITION_READY))
        .is_some_and(|c| c.status == ConditionStatus::True)
}
