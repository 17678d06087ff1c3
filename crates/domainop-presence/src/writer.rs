//! Where reconciliation results go once a pass ends.

use crate::error::PresenceResult;
use crate::reconciler::ReconcileReport;

/// Persists the result of a reconciliation pass.
pub trait StatusWriter: Send + Sync {
    fn write_status(&self, report: &ReconcileReport) -> PresenceResult<()>;
}
