//! redb table definitions. `&str` keys, JSON `&[u8]` values.

use redb::TableDefinition;

/// Latest status per domain, keyed by `{namespace}/{name}`.
pub const STATUSES: TableDefinition<&str, &[u8]> = TableDefinition::new("statuses");

/// Reconcile outcome history, keyed by `{namespace}/{name}#{index:010}`.
pub const OUTCOMES: TableDefinition<&str, &[u8]> = TableDefinition::new("outcomes");
