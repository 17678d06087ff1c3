//! Server pods: identity, the set a domain wants, and deletion.

use std::collections::BTreeSet;
use std::sync::Arc;

use domainop_calls::{
    ApiCall, ApiError, ApiFuture, ClusterApi, Resource, ResourceKind, ResourceRef, RetryPolicy,
};
use domainop_core::{
    CLUSTER_NAME_LABEL, CREATED_BY_OPERATOR_LABEL, DOMAIN_UID_LABEL, Domain, SERVER_NAME_LABEL,
    ServerStartPolicy, pod_name,
};
use domainop_fiber::{BoxStep, Fork, NextAction, Packet, Terminal};
use tracing::{debug, info};

/// Pod for one server, carrying only its identity labels.
pub fn server_pod(domain: &Domain, server_name: &str) -> Resource {
    let pod = Resource::new(
        ResourceKind::Pod,
        domain.namespace(),
        pod_name(domain.domain_uid(), server_name),
    )
    .with_label(DOMAIN_UID_LABEL, domain.domain_uid())
    .with_label(SERVER_NAME_LABEL, server_name)
    .with_label(CREATED_BY_OPERATOR_LABEL, "true");
    match domain.cluster_of(server_name) {
        Some(cluster) => pod.with_label(CLUSTER_NAME_LABEL, cluster),
        None => pod,
    }
}

/// Managed servers the start policy asks for.
pub fn managed_to_start(domain: &Domain) -> Vec<String> {
    match domain.spec.server_start_policy {
        ServerStartPolicy::IfNeeded => domain.managed_servers(),
        ServerStartPolicy::AdminOnly | ServerStartPolicy::Never => Vec::new(),
    }
}

/// Pod names the domain should have while running.
pub fn desired_pod_names(domain: &Domain) -> BTreeSet<String> {
    if domain.is_shutting_down() {
        return BTreeSet::new();
    }
    std::iter::once(domain.spec.topology.admin_server.clone())
        .chain(managed_to_start(domain))
        .map(|server| pod_name(domain.domain_uid(), &server))
        .collect()
}

/// Delete one pod. A pod that is already gone counts as deleted.
pub fn delete_pod(api: Arc<dyn ClusterApi>, target: ResourceRef, policy: RetryPolicy) -> BoxStep {
    let request_target = target.clone();
    ApiCall::new(
        "DeleteServerPod",
        api,
        move |api: &dyn ClusterApi| -> ApiFuture<bool> {
            let pending = api.delete(&request_target);
            Box::pin(async move {
                match pending.await {
                    Ok(()) => Ok(true),
                    Err(ApiError::NotFound(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            })
        },
        move |deleted: bool, _packet: &mut Packet| {
            if deleted {
                info!(%target, "deleted server pod");
            } else {
                debug!(%target, "server pod already gone");
            }
            NextAction::next(Terminal::boxed())
        },
    )
    .with_policy(policy)
    .boxed()
}

/// One delete fork per pod.
pub fn delete_forks(
    api: &Arc<dyn ClusterApi>,
    pods: &[Resource],
    policy: &RetryPolicy,
) -> Vec<Fork> {
    pods.iter()
        .map(|pod| {
            Fork::new(
                pod.name.clone(),
                delete_pod(api.clone(), pod.reference(), policy.clone()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use domainop_calls::{MemoryCluster, Operation};
    use domainop_core::{DomainSpec, DomainTopology, ObjectMeta};
    use domainop_fiber::Engine;

    fn domain(policy: ServerStartPolicy) -> Domain {
        let mut clusters = BTreeMap::new();
        clusters.insert("c1".to_string(), vec!["ms1".to_string()]);
        Domain {
            metadata: ObjectMeta {
                namespace: "ns1".into(),
                name: "d1".into(),
                uid: None,
            },
            spec: DomainSpec {
                domain_uid: "uid1".into(),
                server_start_policy: policy,
                max_cluster_concurrent_startup: None,
                clusters: Vec::new(),
                topology: DomainTopology {
                    admin_server: "admin".into(),
                    clusters,
                    servers: vec!["solo".into()],
                },
            },
            status: None,
        }
    }

    #[test]
    fn clustered_pod_carries_cluster_label() {
        let d = domain(ServerStartPolicy::IfNeeded);
        let pod = server_pod(&d, "ms1");
        assert_eq!(pod.name, "uid1-ms1");
        assert_eq!(pod.label(CLUSTER_NAME_LABEL), Some("c1"));
        assert_eq!(pod.label(DOMAIN_UID_LABEL), Some("uid1"));
        assert_eq!(server_pod(&d, "solo").label(CLUSTER_NAME_LABEL), None);
    }

    #[test]
    fn desired_pods_follow_start_policy() {
        let names = |p| {
            desired_pod_names(&domain(p))
                .into_iter()
                .collect::<Vec<_>>()
        };
        assert_eq!(
            names(ServerStartPolicy::IfNeeded),
            vec!["uid1-admin", "uid1-ms1", "uid1-solo"]
        );
        assert_eq!(names(ServerStartPolicy::AdminOnly), vec!["uid1-admin"]);
        assert!(names(ServerStartPolicy::Never).is_empty());
    }

    #[tokio::test]
    async fn deleting_a_missing_pod_succeeds() {
        let cluster = MemoryCluster::new();
        let policy = RetryPolicy::default();
        let step = delete_pod(cluster.api(), ResourceRef::pod("ns1", "uid1-gone"), policy);
        let outcome = Engine::default().run("delete", step, Packet::new()).await;
        assert!(outcome.is_completed());
        assert_eq!(cluster.call_count(Operation::Delete), 1);
    }
}
