//! Bring-down chain: list the domain's pods, delete them all at once,
//! report.

use std::sync::Arc;

use domainop_calls::ChunkedList;
use domainop_core::Domain;
use domainop_fiber::{BoxStep, NextAction, Packet, Step};
use tracing::info;

use crate::context::{ChainContext, DOMAIN_PODS};
use crate::pods::delete_forks;
use crate::report::ReportStatus;

/// Build the bring-down chain for `domain`.
pub fn bring_down(ctx: &ChainContext, domain: Arc<Domain>) -> BoxStep {
    let listing = ctx.pod_listing(&domain);
    let delete_all = Box::new(DeleteAll {
        ctx: ctx.clone(),
        domain,
    });
    ChunkedList::new(listing, ctx.api.clone(), DOMAIN_PODS, delete_all)
        .with_policy(ctx.policy.clone())
        .with_max_restarts(ctx.config.listing.max_restarts)
        .boxed()
}

struct DeleteAll {
    ctx: ChainContext,
    domain: Arc<Domain>,
}

impl Step for DeleteAll {
    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let DeleteAll { ctx, domain } = *self;
        let pods = packet.get(DOMAIN_PODS).cloned().unwrap_or_default();
        info!(domain = %domain.domain_uid(), pods = pods.len(), "shutting domain down");
        let report = Box::new(ReportStatus::new(domain));
        NextAction::fork_join(delete_forks(&ctx.api, &pods, &ctx.policy), report)
    }
}
