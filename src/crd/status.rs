//! # Status Types
//!
//! Status of the Decofile resource and its conditions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting whether the ConfigMap is materialized
pub const CONDITION_READY: &str = "Ready";

/// Condition type reporting the outcome of the last pod fan-out
pub const CONDITION_PODS_NOTIFIED: &str = "PodsNotified";

/// Status of the Decofile resource
///
/// Tracks the bound ConfigMap, the last content write, and the notification
/// outcome for the most recent configuration generation.
#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecofileStatus {
    /// Name of the owned ConfigMap
    #[serde(default)]
    pub config_map: Option<String>,
    /// Wall-clock of the last successful reconcile (RFC3339)
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Resolved source variant ("inline" or "github")
    #[serde(default)]
    pub source: Option<String>,
    /// Last revision identifier seen from an archive source.
    /// Reconciles with an unchanged revision skip the download entirely.
    #[serde(default)]
    pub last_seen_revision: Option<String>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    pub fn new(r#type: &str, status: &str, reason: &str, message: Option<String>) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: status.to_string(),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message,
        }
    }
}

/// Insert or replace a condition by type, keeping the rest in place
pub fn upsert_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

/// Identifier of the configuration generation a notification reports on,
/// embedded in the `PodsNotified` condition message so rollout watchers can
/// parse it back out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationId {
    /// Archive sources report the commit they were built from
    Commit(String),
    /// Inline sources report the ConfigMap write timestamp
    Timestamp(String),
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationId::Commit(sha) => write!(f, "commit:{sha}"),
            GenerationId::Timestamp(secs) => write!(f, "timestamp:{secs}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_matching_type_only() {
        let mut conditions = vec![
            Condition::new(CONDITION_READY, "True", "ConfigMapCreated", None),
            Condition::new(CONDITION_PODS_NOTIFIED, "Unknown", "NotificationInProgress", None),
        ];

        upsert_condition(
            &mut conditions,
            Condition::new(
                CONDITION_PODS_NOTIFIED,
                "True",
                "NotificationSucceeded",
                Some("notified 4 pods for commit:abc".to_string()),
            ),
        );

        assert_eq!(conditions.len(), 2);
        let notified = conditions
            .iter()
            .find(|c| c.r#type == CONDITION_PODS_NOTIFIED)
            .expect("condition present");
        assert_eq!(notified.status, "True");
    }

    #[test]
    fn generation_id_is_machine_parseable() {
        assert_eq!(
            GenerationId::Commit("4f06e7b".to_string()).to_string(),
            "commit:4f06e7b"
        );
        assert_eq!(
            GenerationId::Timestamp("1722470400".to_string()).to_string(),
            "timestamp:1722470400"
        );
    }
}
