//! StatusStore — redb-backed persistence of domain status.
//!
//! Supports on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use domainop_core::epoch_secs;
use domainop_presence::{PresenceError, PresenceResult, ReconcileReport, StatusWriter};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome history entries kept per domain.
pub const HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct StatusStore {
    db: Arc<Database>,
}

impl StatusStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "status store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory status store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(STATUSES).map_err(map_err!(Table))?;
        txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Status ─────────────────────────────────────────────────────

    /// Store `record` as the domain's current status and append its
    /// outcome to the history, dropping the oldest entries past
    /// [`HISTORY_LIMIT`]. Both writes commit together.
    pub fn put_status(&self, record: &StatusRecord) -> StateResult<()> {
        let key = record.domain_key.as_str();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let outcome =
            serde_json::to_vec(&record.outcome_record()).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut statuses = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            statuses
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;

            let mut outcomes = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
            let prefix = history_prefix(key);
            let mut existing: Vec<String> = Vec::new();
            for entry in outcomes.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                if k.value().starts_with(&prefix) {
                    existing.push(k.value().to_string());
                }
            }
            let next = existing
                .last()
                .and_then(|k| k[prefix.len()..].parse::<u64>().ok())
                .map_or(0, |index| index + 1);
            outcomes
                .insert(history_key(key, next).as_str(), outcome.as_slice())
                .map_err(map_err!(Write))?;

            let excess = (existing.len() + 1).saturating_sub(HISTORY_LIMIT);
            for old in existing.iter().take(excess) {
                outcomes.remove(old.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, outcome = %record.outcome, "status stored");
        Ok(())
    }

    pub fn get_status(&self, key: &str) -> StateResult<Option<StatusRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: StatusRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn list_statuses(&self) -> StateResult<Vec<StatusRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(STATUSES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: StatusRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Forget a domain: its status and its history. Returns true if a
    /// status existed.
    pub fn delete_status(&self, key: &str) -> StateResult<bool> {
        let prefix = history_prefix(key);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut statuses = txn.open_table(STATUSES).map_err(map_err!(Table))?;
            existed = statuses.remove(key).map_err(map_err!(Write))?.is_some();

            let mut outcomes = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
            let mut history: Vec<String> = Vec::new();
            for entry in outcomes.iter().map_err(map_err!(Read))? {
                let (k, _) = entry.map_err(map_err!(Read))?;
                if k.value().starts_with(&prefix) {
                    history.push(k.value().to_string());
                }
            }
            for k in &history {
                outcomes.remove(k.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "status deleted");
        Ok(existed)
    }

    // ── History ────────────────────────────────────────────────────

    /// A domain's outcomes, oldest first.
    pub fn list_outcomes(&self, key: &str) -> StateResult<Vec<OutcomeRecord>> {
        let prefix = history_prefix(key);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(OUTCOMES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (k, value) = entry.map_err(map_err!(Read))?;
            if k.value().starts_with(&prefix) {
                let record: OutcomeRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }
}

impl StatusWriter for StatusStore {
    fn write_status(&self, report: &ReconcileReport) -> PresenceResult<()> {
        let record = StatusRecord::from_report(report, epoch_secs());
        self.put_status(&record)
            .map_err(|e| PresenceError::StatusWrite {
                domain: report.domain_key.clone(),
                cause: e.to_string(),
            })
    }
}

fn history_prefix(domain_key: &str) -> String {
    format!("{domain_key}#")
}

// Zero-padded so lexicographic key order is insertion order.
fn history_key(domain_key: &str, index: u64) -> String {
    format!("{domain_key}#{index:010}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainop_core::{DomainStatus, ReconcileOutcome, ServerState, ServerStatus};
    use domainop_fiber::StepFailure;

    fn report(key: &str, outcome: ReconcileOutcome) -> ReconcileReport {
        let mut status = DomainStatus::new(100);
        status.servers.push(ServerStatus {
            server_name: "ms1".to_string(),
            cluster_name: Some("cluster-1".to_string()),
            state: ServerState::Running,
        });
        ReconcileReport {
            domain_key: key.to_string(),
            outcome,
            status,
            failures: vec![StepFailure::new("ReadinessGate", "ms2 not ready").with_subject("ms2")],
        }
    }

    #[test]
    fn write_then_read_status() {
        let store = StatusStore::open_in_memory().unwrap();
        store
            .write_status(&report("ns1/domain1", ReconcileOutcome::Success))
            .unwrap();

        let record = store.get_status("ns1/domain1").unwrap().unwrap();
        assert_eq!(record.outcome, ReconcileOutcome::Success);
        assert_eq!(record.status.servers.len(), 1);
        assert_eq!(record.failures[0].subject.as_deref(), Some("ms2"));
        assert!(store.get_status("ns1/other").unwrap().is_none());
    }

    #[test]
    fn latest_status_wins_and_history_grows() {
        let store = StatusStore::open_in_memory().unwrap();
        let retry = ReconcileOutcome::Retryable {
            cause: "ms2 not ready".to_string(),
        };
        store.write_status(&report("ns1/domain1", retry.clone())).unwrap();
        store
            .write_status(&report("ns1/domain1", ReconcileOutcome::Success))
            .unwrap();
        store
            .write_status(&report("ns1/domain10", ReconcileOutcome::Cancelled))
            .unwrap();

        let record = store.get_status("ns1/domain1").unwrap().unwrap();
        assert_eq!(record.outcome, ReconcileOutcome::Success);

        let history = store.list_outcomes("ns1/domain1").unwrap();
        let outcomes: Vec<_> = history.into_iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes, vec![retry, ReconcileOutcome::Success]);
        assert_eq!(store.list_statuses().unwrap().len(), 2);
    }

    #[test]
    fn history_is_bounded() {
        let store = StatusStore::open_in_memory().unwrap();
        for _ in 0..HISTORY_LIMIT + 5 {
            store
                .write_status(&report("ns1/domain1", ReconcileOutcome::Success))
                .unwrap();
        }
        assert_eq!(store.list_outcomes("ns1/domain1").unwrap().len(), HISTORY_LIMIT);
    }

    #[test]
    fn delete_removes_status_and_history() {
        let store = StatusStore::open_in_memory().unwrap();
        store
            .write_status(&report("ns1/domain1", ReconcileOutcome::Success))
            .unwrap();
        assert!(store.delete_status("ns1/domain1").unwrap());
        assert!(!store.delete_status("ns1/domain1").unwrap());
        assert!(store.list_outcomes("ns1/domain1").unwrap().is_empty());
    }

    #[test]
    fn on_disk_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.redb");
        {
            let store = StatusStore::open(&path).unwrap();
            store
                .write_status(&report("ns1/domain1", ReconcileOutcome::Success))
                .unwrap();
        }
        let store = StatusStore::open(&path).unwrap();
        let record = store.get_status("ns1/domain1").unwrap().unwrap();
        assert_eq!(record.domain_key, "ns1/domain1");
        assert_eq!(store.list_outcomes("ns1/domain1").unwrap().len(), 1);
    }
}
