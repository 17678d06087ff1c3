//! Full reconciliation passes against an in-memory cluster.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use domainop_calls::{ApiError, MemoryCluster, Operation, ReadyMode, ResourceRef};
use domainop_core::{
    ClusterSpec, Domain, DomainSpec, DomainTopology, ObjectMeta, OperatorConfig,
    ReconcileOutcome, ServerStartPolicy,
};
use domainop_presence::Reconciler;

fn domain() -> Domain {
    let mut clusters = BTreeMap::new();
    clusters.insert(
        "cluster-1".to_string(),
        vec!["ms1".to_string(), "ms2".to_string()],
    );
    clusters.insert("cluster-2".to_string(), vec!["ms3".to_string()]);
    Domain {
        metadata: ObjectMeta {
            namespace: "ns1".to_string(),
            name: "domain1".to_string(),
            uid: None,
        },
        spec: DomainSpec {
            domain_uid: "uid1".to_string(),
            server_start_policy: ServerStartPolicy::IfNeeded,
            max_cluster_concurrent_startup: None,
            clusters: vec![ClusterSpec {
                cluster_name: "cluster-1".to_string(),
                max_concurrent_startup: Some(1),
            }],
            topology: DomainTopology {
                admin_server: "admin".to_string(),
                clusters,
                servers: Vec::new(),
            },
        },
        status: None,
    }
}

fn config() -> OperatorConfig {
    let mut config = OperatorConfig::default();
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 5;
    config.startup.readiness_timeout_secs = 5;
    config.listing.page_size = 2;
    config
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn pod(name: &str) -> ResourceRef {
    ResourceRef::pod("ns1", format!("uid1-{name}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cluster_limit_holds_during_bring_up() {
    let cluster = MemoryCluster::new().with_ready_mode(ReadyMode::Manual);
    let reconciler = Arc::new(Reconciler::new(cluster.api(), config()));
    let pass = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(&domain()).await })
    };

    wait_until("admin created", || cluster.created() == vec!["uid1-admin"]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(cluster.created().len(), 1, "managed servers wait for the admin server");
    cluster.mark_ready(&pod("admin"));

    wait_until("ms1 and ms3 created", || {
        cluster.contains(&pod("ms1")) && cluster.contains(&pod("ms3"))
    })
    .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!cluster.contains(&pod("ms2")), "cluster-1 allows one start at a time");

    cluster.mark_ready(&pod("ms3"));
    cluster.mark_ready(&pod("ms1"));
    wait_until("ms2 created", || cluster.contains(&pod("ms2"))).await;
    cluster.mark_ready(&pod("ms2"));

    let report = pass.await.unwrap();
    assert_eq!(report.outcome, ReconcileOutcome::Success);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn transient_api_errors_are_absorbed() {
    let cluster = MemoryCluster::new();
    cluster.fail_next(Operation::List, ApiError::Unavailable("apiserver".into()));
    cluster.fail_next(Operation::Create, ApiError::TooManyRequests("slow down".into()));
    cluster.fail_next(Operation::Get, ApiError::Timeout("get".into()));
    let reconciler = Reconciler::new(cluster.api(), config());

    let report = reconciler.reconcile(&domain()).await;

    assert_eq!(report.outcome, ReconcileOutcome::Success);
    assert_eq!(cluster.created().len(), 4);
}

#[tokio::test]
async fn persistent_api_errors_make_the_pass_retryable() {
    let cluster = MemoryCluster::new();
    for _ in 0..10 {
        cluster.fail_next(Operation::List, ApiError::Timeout("list".into()));
    }
    let mut config = config();
    config.retry.max_attempts = 2;
    let reconciler = Reconciler::new(cluster.api(), config);

    let report = reconciler.reconcile(&domain()).await;

    match &report.outcome {
        ReconcileOutcome::Retryable { cause } => {
            assert!(cause.contains("gave up after 3 attempts"))
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(cluster.call_count(Operation::List), 3);
    assert!(report.status.has_failed());
}

#[tokio::test]
async fn stale_pods_of_removed_servers_are_deleted() {
    let cluster = MemoryCluster::new();
    let reconciler = Reconciler::new(cluster.api(), config());
    let mut domain = domain();
    reconciler.reconcile(&domain).await;

    domain
        .spec
        .topology
        .clusters
        .insert("cluster-1".to_string(), vec!["ms1".to_string()]);
    let report = reconciler.reconcile(&domain).await;

    assert!(report.outcome.is_success());
    assert_eq!(cluster.deleted(), vec!["uid1-ms2"]);
}
