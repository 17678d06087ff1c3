//! Domain resource model.
//!
//! These are plain data holders mirrored from the `Domain` custom resource.
//! The only behavior here is derived state that reconciliation needs on
//! every pass: the desired lifecycle and the effective startup limits.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::status::DomainStatus;

/// Label carrying the domain UID on every pod the operator owns.
pub const DOMAIN_UID_LABEL: &str = "weblogic.domainUID";

/// Label carrying the server name on a server pod.
pub const SERVER_NAME_LABEL: &str = "weblogic.serverName";

/// Label carrying the cluster name on a clustered server pod.
pub const CLUSTER_NAME_LABEL: &str = "weblogic.clusterName";

/// Label marking resources created by the operator.
pub const CREATED_BY_OPERATOR_LABEL: &str = "weblogic.createdByOperator";

// ── Metadata ──────────────────────────────────────────────────────

/// Identity of a namespaced resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: Option<String>,
}

// ── Domain ────────────────────────────────────────────────────────

/// The `Domain` custom resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub metadata: ObjectMeta,
    pub spec: DomainSpec,
    #[serde(default)]
    pub status: Option<DomainStatus>,
}

/// Desired state of a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Unique identifier of the domain, used to label and name pods.
    pub domain_uid: String,
    #[serde(default)]
    pub server_start_policy: ServerStartPolicy,
    /// Domain-wide default for clusters that do not set their own limit.
    #[serde(default)]
    pub max_cluster_concurrent_startup: Option<u32>,
    #[serde(default)]
    pub clusters: Vec<ClusterSpec>,
    pub topology: DomainTopology,
}

/// Per-cluster overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_name: String,
    /// Maximum number of servers starting at once; 0 means unlimited.
    #[serde(default)]
    pub max_concurrent_startup: Option<u32>,
}

/// Which servers the operator should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStartPolicy {
    /// Start the admin server and every managed server.
    #[default]
    IfNeeded,
    /// Start only the admin server.
    AdminOnly,
    /// Run nothing; the domain is shutting down.
    Never,
}

/// Server layout of the domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DomainTopology {
    pub admin_server: String,
    /// Cluster name → member server names, in startup order.
    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<String>>,
    /// Managed servers that belong to no cluster.
    #[serde(default)]
    pub servers: Vec<String>,
}

/// Desired lifecycle of a domain, recomputed on every reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainLifecycle {
    Running,
    ShuttingDown,
}

impl fmt::Display for DomainLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainLifecycle::Running => f.write_str("running"),
            DomainLifecycle::ShuttingDown => f.write_str("shutting-down"),
        }
    }
}

impl Domain {
    /// Namespace-scoped key, `{namespace}/{name}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }

    pub fn domain_uid(&self) -> &str {
        &self.spec.domain_uid
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn is_shutting_down(&self) -> bool {
        self.spec.server_start_policy == ServerStartPolicy::Never
    }

    pub fn lifecycle(&self) -> DomainLifecycle {
        if self.is_shutting_down() {
            DomainLifecycle::ShuttingDown
        } else {
            DomainLifecycle::Running
        }
    }

    /// Look up the spec overrides for a cluster.
    pub fn cluster(&self, cluster_name: &str) -> Option<&ClusterSpec> {
        self.spec
            .clusters
            .iter()
            .find(|c| c.cluster_name == cluster_name)
    }

    /// Effective startup limit for a cluster.
    ///
    /// Resolution order: the cluster's own setting, then the domain-wide
    /// setting, then `global_default`. Zero means unlimited.
    pub fn max_concurrent_startup(&self, cluster_name: &str, global_default: u32) -> u32 {
        self.cluster(cluster_name)
            .and_then(|c| c.max_concurrent_startup)
            .or(self.spec.max_cluster_concurrent_startup)
            .unwrap_or(global_default)
    }

    /// Name of the cluster a server belongs to, if any.
    pub fn cluster_of(&self, server_name: &str) -> Option<&str> {
        self.spec
            .topology
            .clusters
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == server_name))
            .map(|(name, _)| name.as_str())
    }

    /// Every managed server (clustered and unclustered) in topology order.
    pub fn managed_servers(&self) -> Vec<String> {
        let topology = &self.spec.topology;
        topology
            .clusters
            .values()
            .flatten()
            .chain(topology.servers.iter())
            .filter(|s| **s != topology.admin_server)
            .cloned()
            .collect()
    }
}

/// Pod name for a server: `{domain_uid}-{server_name}`, lowercased with
/// underscores replaced, as Kubernetes names must be DNS-1123 labels.
pub fn pod_name(domain_uid: &str, server_name: &str) -> String {
    format!("{domain_uid}-{server_name}")
        .to_lowercase()
        .replace('_', "-")
}
