//! In-memory cluster used by tests and the simulation daemon.
//!
//! Every mutation bumps a single collection version, reported as the
//! `resource_version` of list pages. Continue tokens have the form
//! `{version}:{offset}` and are served against the current state, so a
//! mutation between two pages shows up as a version change.
//!
//! Failures can be scripted per operation with [`MemoryCluster::fail_next`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::api::{
    ApiFuture, ClusterApi, ListMeta, ListPage, ListRequest, Readiness, Resource, ResourceKind,
    ResourceRef,
};
use crate::error::{ApiError, ApiResult};
use crate::selector::LabelSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Get,
    Create,
    Delete,
    Readiness,
    AwaitReady,
}

/// How created pods become ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    /// Ready as soon as they are created.
    Immediate,
    /// Ready after a fixed delay.
    After(Duration),
    /// Only through [`MemoryCluster::mark_ready`].
    Manual,
}

struct Stored {
    resource: Resource,
    ready: Arc<watch::Sender<bool>>,
}

struct State {
    resources: BTreeMap<ResourceRef, Stored>,
    version: u64,
    ready_mode: ReadyMode,
    never_ready: HashSet<String>,
    faults: HashMap<Operation, VecDeque<ApiError>>,
    calls: HashMap<Operation, usize>,
    created: Vec<String>,
    deleted: Vec<String>,
}

#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                resources: BTreeMap::new(),
                version: 1,
                ready_mode: ReadyMode::Immediate,
                never_ready: HashSet::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
                created: Vec::new(),
                deleted: Vec::new(),
            })),
        }
    }

    /// This cluster as a shared capability.
    pub fn api(&self) -> Arc<dyn ClusterApi> {
        Arc::new(self.clone())
    }

    pub fn with_ready_mode(self, mode: ReadyMode) -> Self {
        self.lock().ready_mode = mode;
        self
    }

    /// Pods with this name never become ready on their own.
    pub fn never_ready(&self, name: impl Into<String>) {
        self.lock().never_ready.insert(name.into());
    }

    /// Fail the next call of `op` with `error`. Queued per operation.
    pub fn fail_next(&self, op: Operation, error: ApiError) {
        self.lock().faults.entry(op).or_default().push_back(error);
    }

    /// Add or replace a resource directly, as another client would.
    pub fn insert(&self, resource: Resource) {
        let mut state = self.lock();
        let ready = matches!(state.ready_mode, ReadyMode::Immediate)
            && !state.never_ready.contains(&resource.name);
        state.store(resource, ready);
    }

    /// Add or replace a resource that already reports ready.
    pub fn insert_ready(&self, resource: Resource) {
        self.lock().store(resource, true);
    }

    /// Remove a resource directly, as another client would.
    pub fn remove(&self, target: &ResourceRef) -> bool {
        let mut state = self.lock();
        let removed = state.resources.remove(target).is_some();
        if removed {
            state.version += 1;
        }
        removed
    }

    pub fn mark_ready(&self, target: &ResourceRef) -> bool {
        let state = self.lock();
        match state.resources.get(target) {
            Some(stored) => {
                stored.ready.send_replace(true);
                true
            }
            None => false,
        }
    }

    pub fn is_ready(&self, target: &ResourceRef) -> bool {
        self.lock()
            .resources
            .get(target)
            .is_some_and(|s| *s.ready.borrow())
    }

    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.lock().resources.contains_key(target)
    }

    /// Names of resources of `kind`, in key order.
    pub fn names(&self, kind: ResourceKind) -> Vec<String> {
        self.lock()
            .resources
            .keys()
            .filter(|r| r.kind == kind)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Names passed to successful `create` calls, in call order.
    pub fn created(&self) -> Vec<String> {
        self.lock().created.clone()
    }

    /// Names passed to successful `delete` calls, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn call_count(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Count the call and pop a scripted failure, if any.
    fn begin(&self, op: Operation) -> ApiResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        if let Some(error) = state.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            debug!(?op, %error, "injected failure");
            return Err(error);
        }
        Ok(state)
    }

    fn list_now(&self, request: &ListRequest) -> ApiResult<ListPage<Resource>> {
        let state = self.begin(Operation::List)?;
        let selector = LabelSelector::parse(request.label_selector.as_deref().unwrap_or(""))?;
        let name_filter = parse_field_selector(request.field_selector.as_deref())?;
        let offset = parse_continue_token(&request.continue_token)?;

        let matching: Vec<&Resource> = state
            .resources
            .values()
            .map(|s| &s.resource)
            .filter(|r| r.kind == request.kind)
            .filter(|r| match (&request.namespace, r.kind.is_namespaced()) {
                (Some(ns), true) => &r.namespace == ns,
                _ => true,
            })
            .filter(|r| name_filter.is_none_or(|name| r.name == name))
            .filter(|r| selector.matches(&r.labels))
            .collect();

        let end = match request.limit {
            0 => matching.len(),
            limit => (offset + limit as usize).min(matching.len()),
        };
        let items: Vec<Resource> = matching
            .get(offset.min(matching.len())..end)
            .unwrap_or_default()
            .iter()
            .map(|r| (*r).clone())
            .collect();
        let continue_token = if end < matching.len() {
            format!("{}:{}", state.version, end)
        } else {
            String::new()
        };

        Ok(ListPage {
            metadata: ListMeta {
                resource_version: state.version.to_string(),
                continue_token,
            },
            items,
        })
    }

    fn create_now(
        &self,
        resource: Resource,
    ) -> ApiResult<(Resource, Option<Arc<watch::Sender<bool>>>)> {
        let mut state = self.begin(Operation::Create)?;
        let target = resource.reference();
        if state.resources.contains_key(&target) {
            return Err(ApiError::Conflict(format!("{target} already exists")));
        }
        let never = state.never_ready.contains(&resource.name);
        let ready = matches!(state.ready_mode, ReadyMode::Immediate) && !never;
        state.created.push(resource.name.clone());
        let stored = state.store(resource, ready);
        let delayed = match state.ready_mode {
            ReadyMode::After(_) if !never => state
                .resources
                .get(&target)
                .map(|s| s.ready.clone()),
            _ => None,
        };
        Ok((stored, delayed))
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    fn store(&mut self, mut resource: Resource, ready: bool) -> Resource {
        self.version += 1;
        resource.resource_version = self.version.to_string();
        let target = resource.reference();
        // A replaced resource keeps its sender so pending waiters stay subscribed.
        let ready = match self.resources.get(&target) {
            Some(existing) => {
                existing.ready.send_replace(ready);
                existing.ready.clone()
            }
            None => Arc::new(watch::channel(ready).0),
        };
        self.resources.insert(
            target,
            Stored {
                resource: resource.clone(),
                ready,
            },
        );
        resource
    }
}

impl ClusterApi for MemoryCluster {
    fn list(&self, request: ListRequest) -> ApiFuture<ListPage<Resource>> {
        let result = self.list_now(&request);
        Box::pin(async move { result })
    }

    fn get(&self, target: &ResourceRef) -> ApiFuture<Option<Resource>> {
        let result = self
            .begin(Operation::Get)
            .map(|state| state.resources.get(target).map(|s| s.resource.clone()));
        Box::pin(async move { result })
    }

    fn create(&self, resource: Resource) -> ApiFuture<Resource> {
        let result = self.create_now(resource);
        let delay = match self.lock().ready_mode {
            ReadyMode::After(delay) => delay,
            _ => Duration::ZERO,
        };
        Box::pin(async move {
            let (created, delayed) = result?;
            if let Some(ready) = delayed {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    ready.send_replace(true);
                });
            }
            Ok(created)
        })
    }

    fn delete(&self, target: &ResourceRef) -> ApiFuture<()> {
        let result = self.begin(Operation::Delete).and_then(|mut state| {
            if state.resources.remove(target).is_none() {
                return Err(ApiError::NotFound(target.to_string()));
            }
            state.version += 1;
            state.deleted.push(target.name.clone());
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn readiness(&self, target: &ResourceRef) -> ApiFuture<Readiness> {
        let result = self.begin(Operation::Readiness).and_then(|state| {
            match state.resources.get(target) {
                Some(s) if *s.ready.borrow() => Ok(Readiness::Ready),
                Some(_) => Ok(Readiness::NotReady),
                None => Err(ApiError::NotFound(target.to_string())),
            }
        });
        Box::pin(async move { result })
    }

    fn await_ready(&self, target: &ResourceRef) -> ApiFuture<()> {
        let missing = ApiError::NotFound(target.to_string());
        let receiver = self.begin(Operation::AwaitReady).and_then(|state| {
            state
                .resources
                .get(target)
                .map(|s| s.ready.subscribe())
                .ok_or_else(|| missing.clone())
        });
        Box::pin(async move {
            let mut rx = receiver?;
            // The sender is dropped when the resource is removed.
            rx.wait_for(|ready| *ready)
                .await
                .map(|_| ())
                .map_err(|_| missing)
        })
    }
}

fn parse_continue_token(token: &str) -> ApiResult<usize> {
    if token.is_empty() {
        return Ok(0);
    }
    token
        .split_once(':')
        .and_then(|(_, offset)| offset.parse().ok())
        .ok_or_else(|| ApiError::Invalid(format!("malformed continue token {token:?}")))
}

/// Only `metadata.name=<name>` is understood.
fn parse_field_selector(selector: Option<&str>) -> ApiResult<Option<&str>> {
    match selector.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .strip_prefix("metadata.name=")
            .map(Some)
            .ok_or_else(|| ApiError::Invalid(format!("unsupported field selector {s:?}"))),
    }
}
