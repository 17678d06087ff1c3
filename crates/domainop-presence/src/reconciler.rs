//! Reconciliation driver.
//!
//! Builds the presence chain for a domain, drives it on the fiber engine,
//! turns the fiber's outcome into a [`ReconcileOutcome`] plus status
//! conditions, and hands the result to the status writer.

use std::sync::Arc;

use domainop_calls::{ChunkedList, ClusterApi, ResourceListing};
use domainop_core::{Domain, DomainStatus, OperatorConfig, ReconcileOutcome, epoch_secs};
use domainop_fiber::{
    BoxStep, CancelToken, Engine, FiberError, FiberOutcome, Packet, StepFailure, Terminal,
};
use tracing::{debug, info, warn};

use crate::context::{ChainContext, DOMAIN_STATUS, NAMESPACES};
use crate::down::bring_down;
use crate::error::{PresenceError, PresenceResult};
use crate::report::{apply_outcome, base_status};
use crate::router::DomainPresenceStep;
use crate::up::bring_up;
use crate::writer::StatusWriter;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileReport {
    /// `{namespace}/{name}` of the domain.
    pub domain_key: String,
    pub outcome: ReconcileOutcome,
    pub status: DomainStatus,
    /// Item failures recorded along the way.
    pub failures: Vec<StepFailure>,
}

pub struct Reconciler {
    ctx: ChainContext,
    engine: Engine,
    writer: Option<Arc<dyn StatusWriter>>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ClusterApi>, config: OperatorConfig) -> Self {
        let ctx = ChainContext::new(api, config);
        let engine = Engine::new(ctx.policy.fiber_config());
        Self {
            ctx,
            engine,
            writer: None,
        }
    }

    pub fn with_status_writer(mut self, writer: Arc<dyn StatusWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.ctx.config
    }

    /// The presence chain for `domain`: router, then bring-up or bring-down.
    pub fn chain_for(&self, domain: &Domain) -> BoxStep {
        let shared = Arc::new(domain.clone());
        DomainPresenceStep::create(
            domain,
            bring_up(&self.ctx, shared.clone()),
            bring_down(&self.ctx, shared),
        )
    }

    pub async fn reconcile(&self, domain: &Domain) -> ReconcileReport {
        self.reconcile_with_token(domain, CancelToken::new()).await
    }

    /// Run one pass, stopping early when `token` is cancelled.
    pub async fn reconcile_with_token(
        &self,
        domain: &Domain,
        token: CancelToken,
    ) -> ReconcileReport {
        let domain_key = domain.table_key();
        info!(domain = %domain_key, lifecycle = %domain.lifecycle(), "reconciling domain");

        let outcome = self
            .engine
            .run_with_token(domain_key.clone(), self.chain_for(domain), Packet::new(), token)
            .await;
        let result = classify(&outcome);
        let mut packet = outcome.into_packet();

        let mut status = packet
            .remove(DOMAIN_STATUS)
            .unwrap_or_else(|| base_status(domain));
        apply_outcome(&mut status, &result, domain.is_shutting_down(), epoch_secs());

        match &result {
            ReconcileOutcome::Success => info!(domain = %domain_key, "domain reconciled"),
            other => warn!(domain = %domain_key, outcome = %other, "domain not fully reconciled"),
        }

        let report = ReconcileReport {
            domain_key,
            outcome: result,
            status,
            failures: packet.failures().to_vec(),
        };
        if let Some(writer) = &self.writer {
            if let Err(e) = writer.write_status(&report) {
                warn!(domain = %report.domain_key, error = %e, "failed to persist domain status");
            }
        }
        report
    }

    /// Namespaces the operator manages.
    ///
    /// With a namespace label selector configured, every matching namespace
    /// is listed from the cluster; otherwise the configured list is used.
    pub async fn managed_namespaces(&self) -> PresenceResult<Vec<String>> {
        self.managed_namespaces_with_token(CancelToken::new()).await
    }

    /// Like [`Reconciler::managed_namespaces`], stopping the listing when
    /// `token` is cancelled.
    pub async fn managed_namespaces_with_token(
        &self,
        token: CancelToken,
    ) -> PresenceResult<Vec<String>> {
        let config = &self.ctx.config;
        let Some(selector) = config.operator.namespace_label_selector.clone() else {
            return Ok(config.domain_namespaces());
        };
        let listing = ResourceListing::namespaces(Some(selector))
            .with_page_size(config.listing.page_size);
        let chain = ChunkedList::new(listing, self.ctx.api.clone(), NAMESPACES, Terminal::boxed())
            .with_policy(self.ctx.policy.clone())
            .with_max_restarts(config.listing.max_restarts)
            .boxed();

        let outcome = self
            .engine
            .run_with_token("namespaces", chain, Packet::new(), token)
            .await;
        match outcome {
            FiberOutcome::Completed(mut packet) => {
                let names: Vec<String> = packet
                    .remove(NAMESPACES)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|ns| ns.name)
                    .collect();
                debug!(count = names.len(), "namespaces listed");
                Ok(names)
            }
            FiberOutcome::Failed { error, .. } => Err(PresenceError::Namespaces(error)),
            FiberOutcome::Cancelled(_) => Err(PresenceError::Cancelled),
        }
    }
}

/// How a finished fiber maps onto a reconcile outcome.
///
/// Item failures leave the chain completed; they make the pass retryable
/// unless one of them can never succeed.
fn classify(outcome: &FiberOutcome) -> ReconcileOutcome {
    match outcome {
        FiberOutcome::Cancelled(_) => ReconcileOutcome::Cancelled,
        FiberOutcome::Failed { error, .. } => match error {
            FiberError::Fatal { .. } => ReconcileOutcome::Fatal {
                cause: error.to_string(),
            },
            FiberError::RetriesExhausted { .. } | FiberError::Panicked { .. } => {
                ReconcileOutcome::Retryable {
                    cause: error.to_string(),
                }
            }
        },
        FiberOutcome::Completed(packet) => {
            let failures = packet.failures();
            if failures.is_empty() {
                return ReconcileOutcome::Success;
            }
            let cause = failures
                .iter()
                .map(|f| f.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            if failures.iter().all(|f| f.retryable) {
                ReconcileOutcome::Retryable { cause }
            } else {
                ReconcileOutcome::Fatal { cause }
            }
        }
    }
}
