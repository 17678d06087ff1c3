//! domainop-startup — brings managed servers up without overwhelming a
//! cluster.
//!
//! ```text
//! ManagedServerUp
//!   ├── group "cluster-1" (limit 2) ── lane 0 ─┐  shared queue: ms1 ms2 ms3 ms4
//!   │                                  lane 1 ─┘  each lane: take item → start → ready → take next
//!   ├── group "cluster-2" (limit 0) ── one lane per item
//!   └── group unclustered           ── one lane per item
//!        │
//!        └── all groups joined ──► on_complete (exactly once)
//! ```
//!
//! A lane holds at most one item in flight, so a group's concurrency never
//! exceeds its lane count. Groups are independent: a server that never
//! becomes ready only holds up its own lane.

pub mod error;
pub mod gauge;
pub mod item;
pub mod scheduler;
pub mod server;

pub use error::{StartupError, StartupResult};
pub use gauge::AdmissionGauge;
pub use item::{ClusterStartupGroup, StartupLimits, StartupWorkItem};
pub use scheduler::{ManagedServerUp, start_servers};
pub use server::{ReadinessGate, server_start_chain};
