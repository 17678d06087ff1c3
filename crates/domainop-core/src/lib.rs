//! domainop-core — shared types for the domain operator.
//!
//! Holds the `Domain` resource model, the lifecycle and status types that
//! reconciliation produces, and the operator configuration file format.
//! Nothing in here performs I/O against the cluster.

pub mod config;
pub mod error;
pub mod namespace;
pub mod status;
pub mod types;

pub use config::{ListingConfig, OperatorConfig, OperatorSection, RetryConfig, StartupConfig};
pub use error::{ConfigError, ConfigResult};
pub use namespace::parse_namespace_list;
pub use status::*;
pub use types::*;
