//! Domain presence router.
//!
//! Picks the bring-up or the bring-down chain from the lifecycle derived
//! on this pass. Nothing is remembered between passes.

use domainop_core::{Domain, DomainLifecycle};
use domainop_fiber::{BoxStep, NextAction, Packet, Step};
use tracing::info;

/// `down` when the domain is shutting down, `up` otherwise.
pub fn route(lifecycle: DomainLifecycle, up: BoxStep, down: BoxStep) -> BoxStep {
    match lifecycle {
        DomainLifecycle::ShuttingDown => down,
        DomainLifecycle::Running => up,
    }
}

pub struct DomainPresenceStep {
    domain_uid: String,
    lifecycle: DomainLifecycle,
    up: BoxStep,
    down: BoxStep,
}

impl DomainPresenceStep {
    pub fn create(domain: &Domain, up: BoxStep, down: BoxStep) -> BoxStep {
        Box::new(Self {
            domain_uid: domain.domain_uid().to_string(),
            lifecycle: domain.lifecycle(),
            up,
            down,
        })
    }
}

impl Step for DomainPresenceStep {
    fn name(&self) -> &'static str {
        "DomainPresence"
    }

    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        let DomainPresenceStep {
            domain_uid,
            lifecycle,
            up,
            down,
        } = *self;
        let chosen = route(lifecycle, up, down);
        info!(domain = %domain_uid, %lifecycle, chain = chosen.name(), "routing domain");
        NextAction::next(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use domainop_fiber::{Engine, FnStep, Key, Terminal};

    const TAKEN: Key<&'static str> = Key::new("test.taken");

    fn mark(which: &'static str) -> BoxStep {
        FnStep::boxed(
            which,
            move |packet: &mut Packet| {
                packet.insert(TAKEN, which);
            },
            Terminal::boxed(),
        )
    }

    #[test]
    fn shutting_down_routes_down() {
        let chosen = route(DomainLifecycle::ShuttingDown, mark("up"), mark("down"));
        assert_eq!(chosen.name(), "down");
        let chosen = route(DomainLifecycle::Running, mark("up"), mark("down"));
        assert_eq!(chosen.name(), "up");
    }

    #[tokio::test]
    async fn presence_step_runs_selected_chain() {
        let mut domain = crate::testing::domain();
        domain.spec.server_start_policy = domainop_core::ServerStartPolicy::Never;
        let step = DomainPresenceStep::create(&domain, mark("up"), mark("down"));
        let outcome = Engine::default().run("presence", step, Packet::new()).await;
        assert_eq!(outcome.packet().get(TAKEN), Some(&"down"));
    }
}
