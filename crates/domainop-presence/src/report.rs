//! Status reporting: per-server states from what the chain recorded, and
//! conditions from how the reconciliation ended.

use std::collections::BTreeSet;
use std::sync::Arc;

use domainop_core::{
    ConditionType, Domain, DomainCondition, DomainStatus, ReconcileOutcome, ServerState,
    ServerStatus, epoch_secs,
};
use domainop_fiber::{NextAction, Packet, Step};
use tracing::debug;

use crate::context::DOMAIN_STATUS;
use crate::pods::managed_to_start;

/// Last step of both presence chains: stores the domain's server states
/// under [`DOMAIN_STATUS`].
pub struct ReportStatus {
    domain: Arc<Domain>,
}

impl ReportStatus {
    pub fn new(domain: Arc<Domain>) -> Self {
        Self { domain }
    }
}

impl Step for ReportStatus {
    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let failed: BTreeSet<&str> = packet
            .failures()
            .iter()
            .filter_map(|f| f.subject.as_deref())
            .collect();
        let mut status = base_status(&self.domain);
        status.servers = server_states(&self.domain, &failed);
        debug!(
            domain = %self.domain.domain_uid(),
            servers = status.servers.len(),
            failed = failed.len(),
            "status computed"
        );
        packet.insert(DOMAIN_STATUS, status);
        NextAction::Terminate
    }
}

/// The domain's current status, or a fresh one when it has none yet.
pub fn base_status(domain: &Domain) -> DomainStatus {
    domain
        .status
        .clone()
        .unwrap_or_else(|| DomainStatus::new(epoch_secs()))
}

fn server_states(domain: &Domain, failed: &BTreeSet<&str>) -> Vec<ServerStatus> {
    let topology = &domain.spec.topology;
    let admin = topology.admin_server.as_str();
    let wanted: BTreeSet<String> = managed_to_start(domain).into_iter().collect();
    let admin_failed = failed.contains(admin);

    std::iter::once(admin.to_string())
        .chain(domain.managed_servers())
        .map(|server| {
            let state = if domain.is_shutting_down() {
                ServerState::Shutdown
            } else if failed.contains(server.as_str()) {
                ServerState::Failed
            } else if server == admin {
                ServerState::Running
            } else if !wanted.contains(&server) {
                ServerState::Shutdown
            } else if admin_failed {
                // Managed servers wait for the admin server.
                ServerState::Starting
            } else {
                ServerState::Running
            };
            ServerStatus {
                cluster_name: domain.cluster_of(&server).map(str::to_string),
                server_name: server,
                state,
            }
        })
        .collect()
}

/// Record `outcome` on `status` as conditions, reason and message.
pub fn apply_outcome(
    status: &mut DomainStatus,
    outcome: &ReconcileOutcome,
    shutting_down: bool,
    now: u64,
) {
    let (available, progressing, failed, reason) = match outcome {
        ReconcileOutcome::Success if shutting_down => (false, false, false, "ShutDown"),
        ReconcileOutcome::Success => (true, false, false, "ServersReady"),
        ReconcileOutcome::Retryable { .. } => (false, true, true, "ServerStartFailed"),
        ReconcileOutcome::Fatal { .. } => (false, false, true, "ReconcileAborted"),
        ReconcileOutcome::Cancelled => {
            status.set_condition(DomainCondition::new(
                ConditionType::Progressing,
                true,
                "Cancelled",
                "reconciliation was cancelled before it finished",
                now,
            ));
            return;
        }
    };
    let message = outcome.to_string();

    status.set_condition(DomainCondition::new(
        ConditionType::Available,
        available,
        reason,
        message.clone(),
        now,
    ));
    status.set_condition(DomainCondition::new(
        ConditionType::Progressing,
        progressing,
        reason,
        message.clone(),
        now,
    ));
    status.set_condition(DomainCondition::new(
        ConditionType::Failed,
        failed,
        reason,
        outcome.cause().unwrap_or_default(),
        now,
    ));
    status.reason = Some(reason.to_string());
    status.message = Some(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainop_core::ServerStartPolicy;
    use domainop_fiber::{Engine, StepFailure};

    use crate::testing;

    #[tokio::test]
    async fn failed_server_is_marked_failed() {
        let domain = Arc::new(testing::domain());
        let mut packet = Packet::new();
        packet.record_failure(StepFailure::new("ReadinessGate", "not ready").with_subject("ms2"));
        let step = Box::new(ReportStatus::new(domain.clone()));
        let outcome = Engine::default().run("report", step, packet).await;

        let status = outcome.packet().get(DOMAIN_STATUS).unwrap();
        assert_eq!(status.server("ms2").unwrap().state, ServerState::Failed);
        assert_eq!(status.server("ms1").unwrap().state, ServerState::Running);
        assert_eq!(status.server("admin").unwrap().state, ServerState::Running);
        assert_eq!(
            status.server("ms1").unwrap().cluster_name.as_deref(),
            Some("cluster-1")
        );
    }

    #[test]
    fn admin_only_reports_managed_as_shutdown() {
        let mut domain = testing::domain();
        domain.spec.server_start_policy = ServerStartPolicy::AdminOnly;
        let states = server_states(&domain, &BTreeSet::new());
        assert_eq!(states[0].state, ServerState::Running);
        assert!(states[1..].iter().all(|s| s.state == ServerState::Shutdown));
    }

    #[test]
    fn managed_servers_wait_on_failed_admin() {
        let domain = testing::domain();
        let failed = BTreeSet::from(["admin"]);
        let states = server_states(&domain, &failed);
        assert_eq!(states[0].state, ServerState::Failed);
        assert!(states[1..].iter().all(|s| s.state == ServerState::Starting));
    }

    #[test]
    fn conditions_follow_outcome() {
        let mut status = DomainStatus::new(10);
        apply_outcome(&mut status, &ReconcileOutcome::Success, false, 10);
        assert!(status.condition(ConditionType::Available).unwrap().status);
        assert!(!status.has_failed());

        let outcome = ReconcileOutcome::Retryable {
            cause: "ms2 not ready".into(),
        };
        apply_outcome(&mut status, &outcome, false, 20);
        let failed = status.condition(ConditionType::Failed).unwrap();
        assert!(failed.status);
        assert_eq!(failed.message, "ms2 not ready");
        assert_eq!(failed.last_transition_time, 20);
        assert!(status.condition(ConditionType::Progressing).unwrap().status);
        assert_eq!(status.reason.as_deref(), Some("ServerStartFailed"));
    }

    #[test]
    fn cancellation_only_touches_progressing() {
        let mut status = DomainStatus::new(10);
        apply_outcome(&mut status, &ReconcileOutcome::Success, false, 10);
        apply_outcome(&mut status, &ReconcileOutcome::Cancelled, false, 30);
        assert!(status.condition(ConditionType::Available).unwrap().status);
        assert_eq!(
            status.condition(ConditionType::Progressing).unwrap().reason,
            "Cancelled"
        );
    }
}
