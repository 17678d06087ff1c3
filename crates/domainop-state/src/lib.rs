//! domainop-state — persisted domain status.
//!
//! Backed by [redb](https://docs.rs/redb). Each domain has one current
//! status record keyed by `{namespace}/{name}` and a short history of
//! reconcile outcomes keyed by `{namespace}/{name}#{index}`, so a prefix
//! scan finds a domain's history. Values are JSON.
//!
//! `StatusStore` is `Clone + Send + Sync` and implements the presence
//! crate's `StatusWriter`.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StatusStore;
pub use types::{FailureRecord, OutcomeRecord, StatusRecord};
