//! The cluster API capability and its request/response types.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::error::ApiResult;

/// A pending API call. `'static` so it can be parked inside a suspension.
pub type ApiFuture<T> = Pin<Box<dyn Future<Output = ApiResult<T>> + Send + 'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Pod,
    Service,
    Namespace,
}

impl ResourceKind {
    /// Cluster-scoped kinds ignore the namespace.
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Pod => f.write_str("pod"),
            ResourceKind::Service => f.write_str("service"),
            ResourceKind::Namespace => f.write_str("namespace"),
        }
    }
}

/// Address of a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    /// Empty for cluster-scoped kinds.
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = if kind.is_namespaced() {
            namespace.into()
        } else {
            String::new()
        };
        Self {
            kind,
            namespace,
            name: name.into(),
        }
    }

    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Pod, namespace, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// A resource as the operator sees it: identity and labels only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Version assigned by the cluster on the last write. Empty before
    /// the resource is created.
    pub resource_version: String,
}

impl Resource {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let target = ResourceRef::new(kind, namespace, name);
        Self {
            kind,
            namespace: target.namespace,
            name: target.name,
            labels: BTreeMap::new(),
            resource_version: String::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

/// One page request of a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub kind: ResourceKind,
    /// `None` lists across all namespaces.
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Maximum items per page; 0 means no limit.
    pub limit: u32,
    /// Empty for the first page.
    pub continue_token: String,
}

impl ListRequest {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
            label_selector: None,
            field_selector: None,
            limit: 0,
            continue_token: String::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn continuing(mut self, continue_token: impl Into<String>) -> Self {
        self.continue_token = continue_token.into();
        self
    }
}

/// Collection metadata returned with every page.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListMeta {
    /// Version of the whole collection when the page was served.
    pub resource_version: String,
    /// Token for the next page; empty on the last page.
    pub continue_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage<T> {
    pub metadata: ListMeta,
    pub items: Vec<T>,
}

/// Point-in-time readiness of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    NotReady,
}

/// Cluster API capability.
///
/// Shared by every chain of a reconciliation as `Arc<dyn ClusterApi>`.
/// Implementations synchronize internally; every call must be safe to
/// repeat.
pub trait ClusterApi: Send + Sync {
    /// Fetch one page of a collection.
    fn list(&self, request: ListRequest) -> ApiFuture<ListPage<Resource>>;

    /// Fetch one resource; `None` when it does not exist.
    fn get(&self, target: &ResourceRef) -> ApiFuture<Option<Resource>>;

    /// Create a resource. Fails with `Conflict` when it already exists.
    fn create(&self, resource: Resource) -> ApiFuture<Resource>;

    /// Delete a resource. Fails with `NotFound` when it does not exist.
    fn delete(&self, target: &ResourceRef) -> ApiFuture<()>;

    /// Query current readiness.
    fn readiness(&self, target: &ResourceRef) -> ApiFuture<Readiness>;

    /// Resolves once the resource reports ready. Fails with `NotFound`
    /// if the resource is missing or goes away while waiting.
    fn await_ready(&self, target: &ResourceRef) -> ApiFuture<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_scoped_kinds_drop_namespace() {
        let ns = ResourceRef::new(ResourceKind::Namespace, "ignored", "ns1");
        assert_eq!(ns.namespace, "");
        assert_eq!(ns.to_string(), "namespace ns1");

        let pod = Resource::new(ResourceKind::Pod, "ns1", "uid1-ms1").with_label("app", "x");
        assert_eq!(pod.reference().to_string(), "pod ns1/uid1-ms1");
        assert_eq!(pod.label("app"), Some("x"));
    }

    #[test]
    fn list_request_builder() {
        let request = ListRequest::new(ResourceKind::Pod)
            .in_namespace("ns1")
            .with_label_selector("weblogic.domainUID=uid1")
            .with_limit(50)
            .continuing("7:50");
        assert_eq!(request.namespace.as_deref(), Some("ns1"));
        assert_eq!(request.limit, 50);
        assert_eq!(request.continue_token, "7:50");
    }
}
