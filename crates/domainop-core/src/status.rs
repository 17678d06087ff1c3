//! Domain status and reconciliation outcome types.
//!
//! Reconciliation only produces these values. Persisting them is the job
//! of a status writer outside the orchestration core.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Observed state of a domain. May trail the actual state of the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DomainStatus {
    #[serde(default)]
    pub conditions: Vec<DomainCondition>,
    /// Human readable summary of the latest reconciliation.
    #[serde(default)]
    pub message: Option<String>,
    /// Brief CamelCase reason for the current state.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub servers: Vec<ServerStatus>,
    /// Unix timestamp at which the operator started processing the domain.
    #[serde(default)]
    pub start_time: Option<u64>,
}

/// Kind of a status condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    Available,
    Progressing,
    Failed,
}

/// One machine-readable condition on a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainCondition {
    pub condition_type: ConditionType,
    pub status: bool,
    pub reason: String,
    pub message: String,
    /// Unix timestamp of the last change of `status`.
    pub last_transition_time: u64,
}

/// Observed state of a single server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub server_name: String,
    #[serde(default)]
    pub cluster_name: Option<String>,
    pub state: ServerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    Running,
    Starting,
    Failed,
    Shutdown,
}

impl DomainStatus {
    /// Fresh status for a domain the operator starts processing at `now`.
    pub fn new(now: u64) -> Self {
        Self {
            start_time: Some(now),
            ..Self::default()
        }
    }

    pub fn condition(&self, condition_type: ConditionType) -> Option<&DomainCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// The transition time is kept when the boolean status does not change.
    pub fn set_condition(&mut self, mut condition: DomainCondition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition.condition_type)
        {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    pub fn server(&self, server_name: &str) -> Option<&ServerStatus> {
        self.servers.iter().find(|s| s.server_name == server_name)
    }

    pub fn has_failed(&self) -> bool {
        self.condition(ConditionType::Failed)
            .is_some_and(|c| c.status)
    }
}

impl DomainCondition {
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: u64,
    ) -> Self {
        Self {
            condition_type,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: now,
        }
    }
}

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Success,
    /// Something failed, but a later recheck may succeed.
    Retryable { cause: String },
    /// Retrying will not help until the domain or configuration changes.
    Fatal { cause: String },
    /// The reconciliation was cancelled before it finished.
    Cancelled,
}

impl ReconcileOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReconcileOutcome::Success)
    }

    pub fn cause(&self) -> Option<&str> {
        match self {
            ReconcileOutcome::Retryable { cause } | ReconcileOutcome::Fatal { cause } => {
                Some(cause)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Success => f.write_str("success"),
            ReconcileOutcome::Retryable { cause } => write!(f, "retryable failure: {cause}"),
            ReconcileOutcome::Fatal { cause } => write!(f, "fatal failure: {cause}"),
            ReconcileOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_condition_replaces_same_type() {
        let mut status = DomainStatus::new(100);
        status.set_condition(DomainCondition::new(
            ConditionType::Available,
            false,
            "ServersStarting",
            "starting",
            100,
        ));
        status.set_condition(DomainCondition::new(
            ConditionType::Available,
            true,
            "ServersReady",
            "all servers ready",
            200,
        ));

        assert_eq!(status.conditions.len(), 1);
        let available = status.condition(ConditionType::Available).unwrap();
        assert!(available.status);
        assert_eq!(available.last_transition_time, 200);
    }

    #[test]
    fn unchanged_status_keeps_transition_time() {
        let mut status = DomainStatus::new(100);
        status.set_condition(DomainCondition::new(
            ConditionType::Failed,
            true,
            "ServerStartFailed",
            "ms1 never became ready",
            100,
        ));
        status.set_condition(DomainCondition::new(
            ConditionType::Failed,
            true,
            "ServerStartFailed",
            "ms2 never became ready",
            300,
        ));

        let failed = status.condition(ConditionType::Failed).unwrap();
        assert_eq!(failed.last_transition_time, 100);
        assert_eq!(failed.message, "ms2 never became ready");
        assert!(status.has_failed());
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let outcome = ReconcileOutcome::Retryable {
            cause: "conflict".to_string(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert_eq!(json, r#"{"result":"retryable","cause":"conflict"}"#);
        assert_eq!(outcome.cause(), Some("conflict"));
        assert!(!outcome.is_success());
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        assert!(epoch_secs() > 1_704_067_200);
    }
}
