//! Recheck loop — reconciles every managed domain on a fixed interval until
//! shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use domainop_calls::{MemoryCluster, Resource, ResourceKind};
use domainop_core::Domain;
use domainop_fiber::CancelToken;
use domainop_presence::{ReconcileReport, Reconciler};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::manifest::DomainManifest;

/// Label put on simulated namespaces so a namespace selector can find them.
pub const MANAGED_NAMESPACE_LABEL: (&str, &str) = ("weblogic-operator", "enabled");

/// Add each namespace the simulated cluster does not have yet.
pub fn seed_namespaces<'a>(
    cluster: &MemoryCluster,
    namespaces: impl IntoIterator<Item = &'a String>,
) {
    let (key, value) = MANAGED_NAMESPACE_LABEL;
    for ns in namespaces {
        let namespace = Resource::new(ResourceKind::Namespace, "", ns.as_str());
        if cluster.contains(&namespace.reference()) {
            continue;
        }
        debug!(namespace = %ns, "seeding namespace");
        cluster.insert(namespace.with_label(key, value));
    }
}

/// Reconcile every domain in a managed namespace, concurrently.
pub async fn recheck(
    reconciler: &Arc<Reconciler>,
    domains: &[Domain],
    token: &CancelToken,
) -> anyhow::Result<Vec<ReconcileReport>> {
    let namespaces = reconciler.managed_namespaces_with_token(token.child()).await?;
    let mut passes = JoinSet::new();
    for domain in domains {
        if !namespaces.iter().any(|ns| ns == domain.namespace()) {
            debug!(domain = %domain.table_key(), "namespace not managed, skipping");
            continue;
        }
        let reconciler = reconciler.clone();
        let domain = domain.clone();
        let token = token.child();
        passes.spawn(async move { reconciler.reconcile_with_token(&domain, token).await });
    }

    let mut reports = Vec::new();
    while let Some(joined) = passes.join_next().await {
        match joined {
            Ok(report) => reports.push(report),
            Err(e) => error!(error = %e, "reconciliation task failed"),
        }
    }
    reports.sort_by(|a, b| a.domain_key.cmp(&b.domain_key));
    Ok(reports)
}

pub struct RecheckLoop {
    pub reconciler: Arc<Reconciler>,
    pub manifest_path: PathBuf,
    pub interval: Duration,
    /// Simulated cluster that receives the namespaces of each manifest read.
    pub cluster: Option<MemoryCluster>,
}

impl RecheckLoop {
    /// Run passes until `shutdown` flips. The manifest is re-read before
    /// every pass; a broken manifest keeps the last good one.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            manifest = %self.manifest_path.display(),
            "recheck loop started"
        );
        let mut domains: Vec<Domain> = Vec::new();

        loop {
            match DomainManifest::from_file(&self.manifest_path) {
                Ok(manifest) => {
                    if let Some(cluster) = &self.cluster {
                        seed_namespaces(cluster, &manifest.namespaces());
                    }
                    domains = manifest.domains;
                }
                Err(e) => warn!(error = %format!("{e:#}"), "keeping previous domain manifest"),
            }

            let token = CancelToken::new();
            let pass = recheck(&self.reconciler, &domains, &token);
            tokio::pin!(pass);
            let result = tokio::select! {
                result = &mut pass => result,
                _ = shutdown.changed() => {
                    info!("shutdown requested, cancelling reconciliation");
                    token.cancel();
                    let _ = pass.await;
                    break;
                }
            };
            match result {
                Ok(reports) => log_summary(&reports),
                Err(e) => error!(error = %format!("{e:#}"), "recheck failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("recheck loop stopped");
    }
}

fn log_summary(reports: &[ReconcileReport]) {
    let succeeded = reports.iter().filter(|r| r.outcome.is_success()).count();
    info!(
        domains = reports.len(),
        succeeded,
        failed = reports.len() - succeeded,
        "recheck complete"
    );
}
