//! What every presence chain shares: the cluster API, the operator
//! configuration and the retry policy derived from it.

use std::sync::Arc;
use std::time::Duration;

use domainop_calls::{ClusterApi, Resource, ResourceListing, RetryPolicy};
use domainop_core::{DOMAIN_UID_LABEL, Domain, DomainStatus, OperatorConfig};
use domainop_fiber::Key;

/// Pods of the domain, as listed at the start of the chain.
pub const DOMAIN_PODS: Key<Vec<Resource>> = Key::new("presence.domain_pods");

/// Status computed by the reporting step.
pub const DOMAIN_STATUS: Key<DomainStatus> = Key::new("presence.domain_status");

/// Namespaces found by a namespace listing.
pub const NAMESPACES: Key<Vec<Resource>> = Key::new("presence.namespaces");

#[derive(Clone)]
pub struct ChainContext {
    pub api: Arc<dyn ClusterApi>,
    pub config: Arc<OperatorConfig>,
    pub policy: RetryPolicy,
}

impl ChainContext {
    pub fn new(api: Arc<dyn ClusterApi>, config: OperatorConfig) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        Self {
            api,
            config: Arc::new(config),
            policy,
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.config.readiness_timeout()
    }

    /// Every pod labelled with the domain's UID in its namespace.
    pub fn pod_listing(&self, domain: &Domain) -> ResourceListing {
        ResourceListing::pods(
            domain.namespace(),
            format!("{DOMAIN_UID_LABEL}={}", domain.domain_uid()),
        )
        .with_page_size(self.config.listing.page_size)
    }
}
