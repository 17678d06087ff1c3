//! Startup work items, per-cluster groups and their limits.

use std::collections::BTreeMap;
use std::fmt;

use domainop_core::Domain;
use domainop_fiber::BoxStep;

use crate::gauge::AdmissionGauge;

/// One server to bring up. The chain performs the start and waits for
/// readiness; it runs exactly once.
pub struct StartupWorkItem {
    pub server_name: String,
    pub cluster_name: Option<String>,
    pub chain: BoxStep,
}

impl StartupWorkItem {
    pub fn new(
        server_name: impl Into<String>,
        cluster_name: Option<String>,
        chain: BoxStep,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            cluster_name,
            chain,
        }
    }
}

impl fmt::Debug for StartupWorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartupWorkItem")
            .field("server_name", &self.server_name)
            .field("cluster_name", &self.cluster_name)
            .field("chain", &self.chain.name())
            .finish()
    }
}

/// Effective per-cluster startup limits. Zero means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupLimits {
    per_cluster: BTreeMap<String, u32>,
    default: u32,
}

impl StartupLimits {
    /// Every cluster gets `default` unless overridden.
    pub fn new(default: u32) -> Self {
        Self {
            per_cluster: BTreeMap::new(),
            default,
        }
    }

    pub fn with_cluster(mut self, cluster_name: impl Into<String>, limit: u32) -> Self {
        self.per_cluster.insert(cluster_name.into(), limit);
        self
    }

    /// Limits for every cluster in a domain's topology, resolved through
    /// the cluster, domain and operator-wide settings.
    pub fn for_domain(domain: &Domain, global_default: u32) -> Self {
        let per_cluster = domain
            .spec
            .topology
            .clusters
            .keys()
            .map(|name| (name.clone(), domain.max_concurrent_startup(name, global_default)))
            .collect();
        Self {
            per_cluster,
            default: global_default,
        }
    }

    /// Unclustered servers are never limited.
    pub fn limit_for(&self, cluster_name: Option<&str>) -> u32 {
        match cluster_name {
            None => 0,
            Some(name) => self.per_cluster.get(name).copied().unwrap_or(self.default),
        }
    }

    /// Clusters with an explicit entry.
    pub fn clusters(&self) -> impl Iterator<Item = &str> {
        self.per_cluster.keys().map(String::as_str)
    }
}

/// Items of one cluster (or of no cluster) plus the cluster's limit.
#[derive(Debug)]
pub struct ClusterStartupGroup {
    cluster_name: Option<String>,
    items: Vec<StartupWorkItem>,
    limit: u32,
    gauge: AdmissionGauge,
}

impl ClusterStartupGroup {
    pub fn new(cluster_name: Option<String>, limit: u32) -> Self {
        Self {
            cluster_name,
            items: Vec::new(),
            limit,
            gauge: AdmissionGauge::new(),
        }
    }

    pub fn push(&mut self, item: StartupWorkItem) {
        self.items.push(item);
    }

    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    /// Name used in logs and fiber names.
    pub fn label(&self) -> &str {
        self.cluster_name.as_deref().unwrap_or("unclustered")
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.server_name.as_str())
    }

    pub fn gauge(&self) -> AdmissionGauge {
        self.gauge.clone()
    }

    /// Number of items allowed in flight at once.
    pub fn lanes(&self) -> usize {
        match self.limit as usize {
            0 => self.items.len(),
            limit => limit.min(self.items.len()),
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (Option<String>, Vec<StartupWorkItem>, usize, AdmissionGauge) {
        let lanes = self.lanes();
        (self.cluster_name, self.items, lanes, self.gauge)
    }
}
