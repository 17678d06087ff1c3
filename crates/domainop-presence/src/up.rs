//! Bring-up chain.
//!
//! ```text
//! list domain pods ─► start admin ─► start managed servers ─► remove stale pods ─► report
//!                                     (per-cluster limits)     (fork-join deletes)
//! ```
//!
//! The admin server goes first. Managed servers are only started once it
//! is ready; if it is not, the pass reports and a later recheck tries again.

use std::sync::Arc;

use domainop_calls::ChunkedList;
use domainop_core::Domain;
use domainop_fiber::{BoxStep, FiberError, NextAction, Packet, Step, StepFailure, Terminal};
use domainop_startup::{StartupLimits, StartupWorkItem, server_start_chain, start_servers};
use tracing::{info, warn};

use crate::context::{ChainContext, DOMAIN_PODS};
use crate::pods::{delete_forks, desired_pod_names, managed_to_start, server_pod};
use crate::report::ReportStatus;

/// Build the bring-up chain for `domain`.
pub fn bring_up(ctx: &ChainContext, domain: Arc<Domain>) -> BoxStep {
    let listing = ctx.pod_listing(&domain);
    let start_admin = Box::new(StartAdmin {
        ctx: ctx.clone(),
        domain,
    });
    ChunkedList::new(listing, ctx.api.clone(), DOMAIN_PODS, start_admin)
        .with_policy(ctx.policy.clone())
        .with_max_restarts(ctx.config.listing.max_restarts)
        .boxed()
}

struct StartAdmin {
    ctx: ChainContext,
    domain: Arc<Domain>,
}

impl Step for StartAdmin {
    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        let StartAdmin { ctx, domain } = *self;
        let admin = domain.spec.topology.admin_server.clone();
        info!(domain = %domain.domain_uid(), server = %admin, "starting admin server");
        let pod = server_pod(&domain, &admin);
        let plan = Box::new(PlanManaged {
            ctx: ctx.clone(),
            domain,
        });
        NextAction::next(server_start_chain(
            ctx.api.clone(),
            pod,
            ctx.readiness_timeout(),
            ctx.policy.clone(),
            plan,
        ))
    }
}

struct PlanManaged {
    ctx: ChainContext,
    domain: Arc<Domain>,
}

impl Step for PlanManaged {
    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let PlanManaged { ctx, domain } = *self;
        let admin = domain.spec.topology.admin_server.as_str();

        let admin_failed = packet
            .failures()
            .iter()
            .any(|f| f.subject.as_deref() == Some(admin));
        if admin_failed {
            warn!(
                domain = %domain.domain_uid(),
                server = %admin,
                "admin server not ready, managed servers deferred"
            );
            packet.record_failure(StepFailure::new(
                "PlanManaged",
                format!("managed servers not started: admin server {admin} is not ready"),
            ));
            return NextAction::next(Box::new(ReportStatus::new(domain.clone())));
        }

        let servers = managed_to_start(&domain);
        let items: Vec<StartupWorkItem> = servers
            .iter()
            .map(|server| {
                let chain = server_start_chain(
                    ctx.api.clone(),
                    server_pod(&domain, server),
                    ctx.readiness_timeout(),
                    ctx.policy.clone(),
                    Terminal::boxed(),
                );
                let cluster = domain.cluster_of(server).map(str::to_string);
                StartupWorkItem::new(server.clone(), cluster, chain)
            })
            .collect();
        let limits = StartupLimits::for_domain(&domain, ctx.config.startup.max_concurrent_startup);
        info!(domain = %domain.domain_uid(), servers = items.len(), "starting managed servers");

        let remove_stale = Box::new(RemoveStale { ctx, domain });
        match start_servers(items, &limits, remove_stale) {
            Ok(step) => NextAction::next(step),
            Err(e) => NextAction::abort(FiberError::fatal("PlanManaged", e)),
        }
    }
}

/// Deletes listed pods of the domain that no server wants any more.
struct RemoveStale {
    ctx: ChainContext,
    domain: Arc<Domain>,
}

impl Step for RemoveStale {
    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let RemoveStale { ctx, domain } = *self;
        let desired = desired_pod_names(&domain);
        let stale: Vec<_> = packet
            .get(DOMAIN_PODS)
            .map(|pods| {
                pods.iter()
                    .filter(|pod| !desired.contains(&pod.name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let report = Box::new(ReportStatus::new(domain.clone()));
        if stale.is_empty() {
            return NextAction::next(report);
        }
        info!(domain = %domain.domain_uid(), pods = stale.len(), "removing stale server pods");
        NextAction::fork_join(delete_forks(&ctx.api, &stale, &ctx.policy), report)
    }
}
