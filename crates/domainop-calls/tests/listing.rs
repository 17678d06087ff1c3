//! Listing a domain's pods while another client keeps changing them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use domainop_calls::{
    ApiFuture, ChunkedList, ChunkedSource, ClusterApi, ListMeta, ListPage, ListRequest,
    MemoryCluster, Operation, Resource, ResourceKind, ResourceListing,
};
use domainop_fiber::{Engine, Key, Packet, Terminal};

const PODS: Key<Vec<Resource>> = Key::new("pods");

fn pod(name: &str) -> Resource {
    Resource::new(ResourceKind::Pod, "ns1", name).with_label("weblogic.domainUID", "uid1")
}

/// Adds a pod to the cluster right before the n-th page request.
struct MutatingListing {
    inner: ResourceListing,
    cluster: MemoryCluster,
    mutate_before: usize,
    fetches: AtomicUsize,
}

impl ChunkedSource for MutatingListing {
    type Page = ListPage<Resource>;
    type Item = Resource;

    fn page_request(&self, continue_token: &str) -> ListRequest {
        self.inner.page_request(continue_token)
    }

    fn fetch(&self, api: &Arc<dyn ClusterApi>, request: ListRequest) -> ApiFuture<Self::Page> {
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.mutate_before {
            self.cluster.insert(pod("uid1-late"));
        }
        self.inner.fetch(api, request)
    }

    fn metadata<'p>(&self, page: &'p Self::Page) -> &'p ListMeta {
        self.inner.metadata(page)
    }

    fn items(&self, page: Self::Page) -> Vec<Self::Item> {
        self.inner.items(page)
    }
}

#[tokio::test]
async fn concurrent_insert_restarts_the_scan() {
    let cluster = MemoryCluster::new();
    for i in 0..6 {
        cluster.insert(pod(&format!("uid1-ms{i}")));
    }

    let source = MutatingListing {
        inner: ResourceListing::pods("ns1", "weblogic.domainUID=uid1").with_page_size(2),
        cluster: cluster.clone(),
        mutate_before: 3,
        fetches: AtomicUsize::new(0),
    };
    let chain = ChunkedList::new(source, cluster.api(), PODS, Terminal::boxed()).boxed();
    let outcome = Engine::default().run("list", chain, Packet::new()).await;
    assert!(outcome.is_completed());

    let mut names: Vec<String> = outcome
        .packet()
        .get(PODS)
        .unwrap()
        .iter()
        .map(|p| p.name.clone())
        .collect();
    let total = names.len();
    names.dedup();
    assert_eq!(names.len(), total, "no duplicates");
    assert_eq!(total, 7);
    assert!(names.contains(&"uid1-late".to_string()));

    // Two pages, the discarded third, then a full pass of four pages.
    assert_eq!(cluster.call_count(Operation::List), 7);
}

#[tokio::test]
async fn stable_collection_lists_every_item_once() {
    let cluster = MemoryCluster::new();
    for i in 0..5 {
        cluster.insert(pod(&format!("uid1-ms{i}")));
    }
    let listing = ResourceListing::pods("ns1", "weblogic.domainUID=uid1").with_page_size(2);
    let chain = ChunkedList::new(listing, cluster.api(), PODS, Terminal::boxed()).boxed();
    let outcome = Engine::default().run("list", chain, Packet::new()).await;

    let names: Vec<&str> = outcome
        .packet()
        .get(PODS)
        .unwrap()
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["uid1-ms0", "uid1-ms1", "uid1-ms2", "uid1-ms3", "uid1-ms4"]
    );
    assert_eq!(cluster.call_count(Operation::List), 3);
}
