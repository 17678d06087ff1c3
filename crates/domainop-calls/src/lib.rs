//! domainop-calls — everything a chain needs to talk to the cluster.
//!
//! ```text
//! step ──► ApiCall / ChunkedList ──► Arc<dyn ClusterApi> ──► cluster
//!              │                           │
//!              │ transient ApiError        └── MemoryCluster (tests, simulation)
//!              ▼
//!         NextAction::Retry (RetryPolicy backoff)
//! ```
//!
//! Calls never block a worker: each request is issued as a suspension and
//! the response is handled by a follow-up step.

pub mod api;
pub mod call;
pub mod chunked;
pub mod error;
pub mod memory;
pub mod retry;
pub mod selector;

pub use api::{
    ApiFuture, ClusterApi, ListMeta, ListPage, ListRequest, Readiness, Resource, ResourceKind,
    ResourceRef,
};
pub use call::ApiCall;
pub use chunked::{ChunkedList, ChunkedSource, ListAccumulator, PageOutcome, ResourceListing};
pub use error::{ApiError, ApiResult};
pub use memory::{MemoryCluster, Operation, ReadyMode};
pub use retry::RetryPolicy;
pub use selector::{LabelSelector, Requirement};
