//! Persisted record types.

use domainop_core::{DomainStatus, ReconcileOutcome};
use domainop_fiber::StepFailure;
use domainop_presence::ReconcileReport;
use serde::{Deserialize, Serialize};

/// Current status of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// `{namespace}/{name}`.
    pub domain_key: String,
    pub status: DomainStatus,
    pub outcome: ReconcileOutcome,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    pub updated_at: u64,
}

/// One entry of a domain's outcome history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub domain_key: String,
    pub outcome: ReconcileOutcome,
    pub recorded_at: u64,
}

/// A server-level failure from the pass that produced the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub source: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub message: String,
    pub retryable: bool,
}

impl From<&StepFailure> for FailureRecord {
    fn from(failure: &StepFailure) -> Self {
        Self {
            source: failure.source.clone(),
            subject: failure.subject.clone(),
            message: failure.message.clone(),
            retryable: failure.retryable,
        }
    }
}

impl StatusRecord {
    pub fn from_report(report: &ReconcileReport, now: u64) -> Self {
        Self {
            domain_key: report.domain_key.clone(),
            status: report.status.clone(),
            outcome: report.outcome.clone(),
            failures: report.failures.iter().map(FailureRecord::from).collect(),
            updated_at: now,
        }
    }

    pub fn outcome_record(&self) -> OutcomeRecord {
        OutcomeRecord {
            domain_key: self.domain_key.clone(),
            outcome: self.outcome.clone(),
            recorded_at: self.updated_at,
        }
    }
}
