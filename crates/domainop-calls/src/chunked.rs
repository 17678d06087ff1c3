//! Chunked list accumulation.
//!
//! Large collections are fetched one page at a time. Pages are only
//! consistent with each other while the collection's version marker stays
//! put; when a later page reports a different marker, everything gathered
//! so far is discarded and the scan restarts from a fresh first page.
//!
//! ```text
//! ChunkedList ──fetch(token)──► PageReceived
//!      ▲                            │ Ok, marker changed   → clear, token = "", restart
//!      │                            │ Ok, token non-empty  → append, fetch next
//!      └────────────────────────────┤ Err transient        → Retry (accumulator kept)
//!                                   │ Err final            → Abort
//!                                   └ Ok, token empty      → write `into`, continue
//! ```

use std::sync::Arc;

use domainop_fiber::{BoxStep, FiberError, Key, NextAction, Packet, Step};
use tracing::debug;

use crate::api::{ApiFuture, ClusterApi, ListMeta, ListPage, ListRequest, Resource, ResourceKind};
use crate::error::ApiResult;
use crate::retry::RetryPolicy;

/// Describes how to page through one kind of collection.
pub trait ChunkedSource: Send + Sync + 'static {
    type Page: Send + 'static;
    type Item: Clone + Send + Sync + 'static;

    /// Request for the page at `continue_token` (empty for the first page).
    fn page_request(&self, continue_token: &str) -> ListRequest;

    fn fetch(&self, api: &Arc<dyn ClusterApi>, request: ListRequest) -> ApiFuture<Self::Page>;

    fn metadata<'p>(&self, page: &'p Self::Page) -> &'p ListMeta;

    fn items(&self, page: Self::Page) -> Vec<Self::Item>;
}

/// What absorbing a page did to the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Items appended; more pages follow.
    More,
    /// Items appended; that was the last page.
    Complete,
    /// The collection changed mid-scan; accumulated items were discarded.
    Restarted,
}

/// Items gathered so far plus the position of the scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListAccumulator<T> {
    items: Vec<T>,
    continue_token: String,
    resource_version: Option<String>,
    restarts: u32,
}

impl<T> Default for ListAccumulator<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            continue_token: String::new(),
            resource_version: None,
            restarts: 0,
        }
    }
}

impl<T> ListAccumulator<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one page into the accumulator.
    ///
    /// A first page always sets the baseline marker. A later page with a
    /// different marker discards its own items along with everything
    /// gathered so far, adopts the new marker and rewinds to the first page.
    pub fn absorb(&mut self, meta: &ListMeta, items: Vec<T>) -> PageOutcome {
        let first_page = self.continue_token.is_empty();
        let changed = self
            .resource_version
            .as_ref()
            .is_some_and(|seen| *seen != meta.resource_version);

        if changed && !first_page {
            self.items.clear();
            self.continue_token.clear();
            self.resource_version = Some(meta.resource_version.clone());
            self.restarts += 1;
            return PageOutcome::Restarted;
        }

        self.resource_version = Some(meta.resource_version.clone());
        self.items.extend(items);
        self.continue_token = meta.continue_token.clone();
        if self.continue_token.is_empty() {
            PageOutcome::Complete
        } else {
            PageOutcome::More
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn continue_token(&self) -> &str {
        &self.continue_token
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.resource_version.as_deref()
    }

    /// Times the scan started over because the collection changed.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }
}

/// Step that lists a whole collection into `into`, then continues.
pub struct ChunkedList<S: ChunkedSource> {
    source: Arc<S>,
    api: Arc<dyn ClusterApi>,
    into: Key<Vec<S::Item>>,
    next: BoxStep,
    policy: RetryPolicy,
    max_restarts: Option<u32>,
    attempt: u32,
    state: ListAccumulator<S::Item>,
}

impl<S: ChunkedSource> ChunkedList<S> {
    pub fn new(
        source: S,
        api: Arc<dyn ClusterApi>,
        into: Key<Vec<S::Item>>,
        next: BoxStep,
    ) -> Self {
        Self {
            source: Arc::new(source),
            api,
            into,
            next,
            policy: RetryPolicy::default(),
            max_restarts: None,
            attempt: 0,
            state: ListAccumulator::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Give up once the collection changed more than `max` times during
    /// one scan. `None` keeps restarting for as long as it changes.
    pub fn with_max_restarts(mut self, max: Option<u32>) -> Self {
        self.max_restarts = max;
        self
    }

    pub fn boxed(self) -> BoxStep {
        Box::new(self)
    }
}

impl<S: ChunkedSource> Step for ChunkedList<S> {
    fn name(&self) -> &'static str {
        "ChunkedList"
    }

    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        let request = self.source.page_request(self.state.continue_token());
        let pending = self.source.fetch(&self.api, request);
        NextAction::suspend(async move {
            let result = pending.await;
            Box::new(PageReceived { list: *self, result }) as BoxStep
        })
    }
}

struct PageReceived<S: ChunkedSource> {
    list: ChunkedList<S>,
    result: ApiResult<S::Page>,
}

impl<S: ChunkedSource> Step for PageReceived<S> {
    fn name(&self) -> &'static str {
        "ChunkedList"
    }

    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let PageReceived { mut list, result } = *self;
        let page = match result {
            Ok(page) => page,
            Err(e) if e.is_transient() => {
                list.attempt += 1;
                if list.attempt > list.policy.max_attempts() {
                    return NextAction::abort(FiberError::RetriesExhausted {
                        step: "ChunkedList".to_string(),
                        attempts: list.attempt,
                        cause: e.to_string(),
                    });
                }
                let delay = list.policy.delay_for(list.attempt);
                return NextAction::retry(delay, e, Box::new(list));
            }
            Err(e) => return NextAction::abort(FiberError::fatal("ChunkedList", e)),
        };
        list.attempt = 0;

        let meta = list.source.metadata(&page).clone();
        let items = list.source.items(page);
        match list.state.absorb(&meta, items) {
            PageOutcome::Restarted => {
                let restarts = list.state.restarts();
                if list.max_restarts.is_some_and(|max| restarts > max) {
                    return NextAction::abort(FiberError::fatal(
                        "ChunkedList",
                        format!("collection changed {restarts} times while listing"),
                    ));
                }
                debug!(
                    resource_version = %meta.resource_version,
                    restarts,
                    "collection changed while listing, restarting"
                );
                NextAction::next(Box::new(list))
            }
            PageOutcome::More => NextAction::next(Box::new(list)),
            PageOutcome::Complete => {
                let ChunkedList {
                    into, next, state, ..
                } = list;
                debug!(
                    key = into.name(),
                    items = state.items().len(),
                    restarts = state.restarts(),
                    "listing complete"
                );
                packet.insert(into, state.into_items());
                NextAction::next(next)
            }
        }
    }
}

/// Lists resources of one kind, optionally narrowed by namespace and
/// selectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceListing {
    template: ListRequest,
}

impl ResourceListing {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            template: ListRequest::new(kind),
        }
    }

    /// Pods of one domain in one namespace.
    pub fn pods(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self::new(ResourceKind::Pod)
            .in_namespace(namespace)
            .with_label_selector(label_selector)
    }

    /// Cluster namespaces, optionally narrowed by a label selector.
    pub fn namespaces(label_selector: Option<String>) -> Self {
        let listing = Self::new(ResourceKind::Namespace);
        match label_selector {
            Some(selector) => listing.with_label_selector(selector),
            None => listing,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.template.namespace = Some(namespace.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.template.label_selector = Some(selector.into());
        self
    }

    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.template.field_selector = Some(selector.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.template.limit = page_size;
        self
    }
}

impl ChunkedSource for ResourceListing {
    type Page = ListPage<Resource>;
    type Item = Resource;

    fn page_request(&self, continue_token: &str) -> ListRequest {
        self.template.clone().continuing(continue_token)
    }

    fn fetch(&self, api: &Arc<dyn ClusterApi>, request: ListRequest) -> ApiFuture<Self::Page> {
        api.list(request)
    }

    fn metadata<'p>(&self, page: &'p Self::Page) -> &'p ListMeta {
        &page.metadata
    }

    fn items(&self, page: Self::Page) -> Vec<Self::Item> {
        page.items
    }
}
