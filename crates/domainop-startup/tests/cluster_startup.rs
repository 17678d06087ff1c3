//! Starting managed servers against an in-memory cluster.

use std::time::Duration;

use domainop_calls::{MemoryCluster, ReadyMode, Resource, ResourceKind, ResourceRef, RetryPolicy};
use domainop_core::{CLUSTER_NAME_LABEL, SERVER_NAME_LABEL};
use domainop_fiber::{Engine, Packet, Terminal};
use domainop_startup::{ManagedServerUp, StartupLimits, StartupWorkItem, server_start_chain};

fn work_item(
    cluster: &MemoryCluster,
    server: &str,
    cluster_name: &str,
    timeout: Duration,
) -> StartupWorkItem {
    let pod = Resource::new(ResourceKind::Pod, "ns1", format!("uid1-{server}"))
        .with_label(SERVER_NAME_LABEL, server)
        .with_label(CLUSTER_NAME_LABEL, cluster_name);
    let policy = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 3);
    let chain = server_start_chain(cluster.api(), pod, timeout, policy, Terminal::boxed());
    StartupWorkItem::new(server, Some(cluster_name.to_string()), chain)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limit_one_waits_for_readiness_before_next_pod() {
    let cluster = MemoryCluster::new().with_ready_mode(ReadyMode::Manual);
    let items = vec![
        work_item(&cluster, "ms1", "c1", Duration::from_secs(5)),
        work_item(&cluster, "ms2", "c1", Duration::from_secs(5)),
    ];
    let limits = StartupLimits::new(0).with_cluster("c1", 1);
    let up = ManagedServerUp::new(items, &limits).unwrap();
    let handle = Engine::default().start("up", up.into_step(Terminal::boxed()), Packet::new());

    wait_until("ms1 created", || cluster.created() == vec!["uid1-ms1"]).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(cluster.created(), vec!["uid1-ms1"]);

    cluster.mark_ready(&ResourceRef::pod("ns1", "uid1-ms1"));
    wait_until("ms2 created", || cluster.created().len() == 2).await;
    cluster.mark_ready(&ResourceRef::pod("ns1", "uid1-ms2"));

    let outcome = handle.join().await.unwrap();
    assert!(outcome.is_completed());
    assert!(!outcome.packet().has_failures());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_ready_server_only_blocks_its_lane() {
    let cluster = MemoryCluster::new().with_ready_mode(ReadyMode::After(Duration::from_millis(5)));
    cluster.never_ready("uid1-stuck");
    let timeout = Duration::from_millis(200);
    let items = vec![
        work_item(&cluster, "stuck", "c1", timeout),
        work_item(&cluster, "ms1", "c1", timeout),
        work_item(&cluster, "ms2", "c1", timeout),
        work_item(&cluster, "ms3", "c1", timeout),
        work_item(&cluster, "other", "c2", timeout),
    ];
    let limits = StartupLimits::new(2);
    let up = ManagedServerUp::new(items, &limits).unwrap();
    let gauge = up.group(Some("c1")).unwrap().gauge();

    let started = tokio::time::Instant::now();
    let outcome = Engine::default()
        .run("up", up.into_step(Terminal::boxed()), Packet::new())
        .await;
    assert!(outcome.is_completed());

    // The other lane worked through ms1..ms3 while "stuck" timed out.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(gauge.peak(), 2);
    assert_eq!(cluster.created().len(), 5);

    let failures = outcome.packet().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].subject.as_deref(), Some("stuck"));
}
