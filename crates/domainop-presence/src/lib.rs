//! domainop-presence — keeps a domain's pods in line with its spec.
//!
//! Each pass derives the domain's lifecycle, routes to the bring-up or the
//! bring-down chain, drives it on the fiber engine and reports the outcome
//! as domain status.
//!
//! ```text
//! Reconciler::reconcile(domain)
//!   └── DomainPresenceStep
//!         ├── running       ──► list pods → admin → managed (per-cluster limits) → stale pods → report
//!         └── shutting down ──► list pods → delete all (fork-join) → report
//! ```

pub mod context;
pub mod down;
pub mod error;
pub mod pods;
pub mod reconciler;
pub mod report;
pub mod router;
pub mod up;
pub mod writer;

pub use context::{ChainContext, DOMAIN_PODS, DOMAIN_STATUS, NAMESPACES};
pub use down::bring_down;
pub use error::{PresenceError, PresenceResult};
pub use reconciler::{ReconcileReport, Reconciler};
pub use report::ReportStatus;
pub use router::{DomainPresenceStep, route};
pub use up::bring_up;
pub use writer::StatusWriter;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use domainop_core::{
        ClusterSpec, Domain, DomainSpec, DomainTopology, ObjectMeta, ServerStartPolicy,
    };

    /// Admin server, two clusters and one unclustered server.
    pub fn domain() -> Domain {
        let mut clusters = BTreeMap::new();
        clusters.insert(
            "cluster-1".to_string(),
            vec!["ms1".to_string(), "ms2".to_string()],
        );
        clusters.insert("cluster-2".to_string(), vec!["ms3".to_string()]);
        Domain {
            metadata: ObjectMeta {
                namespace: "ns1".to_string(),
                name: "domain1".to_string(),
                uid: None,
            },
            spec: DomainSpec {
                domain_uid: "uid1".to_string(),
                server_start_policy: ServerStartPolicy::IfNeeded,
                max_cluster_concurrent_startup: None,
                clusters: vec![ClusterSpec {
                    cluster_name: "cluster-1".to_string(),
                    max_concurrent_startup: Some(1),
                }],
                topology: DomainTopology {
                    admin_server: "admin".to_string(),
                    clusters,
                    servers: vec!["solo".to_string()],
                },
            },
            status: None,
        }
    }
}
