//! Standard start chain for one server pod.
//!
//! `get` the pod, `create` it when absent, then wait for readiness with a
//! deadline. A server that misses the deadline is recorded as a failure on
//! the packet; the chain itself still completes so the lane moves on.

use std::sync::Arc;
use std::time::Duration;

use domainop_calls::{
    ApiCall, ApiError, ApiFuture, ApiResult, ClusterApi, Readiness, Resource, ResourceRef,
    RetryPolicy,
};
use domainop_core::SERVER_NAME_LABEL;
use domainop_fiber::{BoxStep, NextAction, Packet, Step, StepFailure};
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};

/// Chain that makes sure `pod` exists and is ready, then runs `next`.
pub fn server_start_chain(
    api: Arc<dyn ClusterApi>,
    pod: Resource,
    readiness_timeout: Duration,
    policy: RetryPolicy,
    next: BoxStep,
) -> BoxStep {
    let target = pod.reference();
    let server = pod
        .label(SERVER_NAME_LABEL)
        .unwrap_or(&pod.name)
        .to_string();
    let gate = ReadinessGate::new(
        api.clone(),
        target.clone(),
        server,
        readiness_timeout,
        next,
    );

    let create_api = api.clone();
    let create_policy = policy.clone();
    ApiCall::new(
        "GetServerPod",
        api,
        move |api: &dyn ClusterApi| api.get(&target),
        move |existing: Option<Resource>, _packet: &mut Packet| match existing {
            Some(found) => {
                debug!(pod = %found.name, "server pod already exists");
                NextAction::next(gate.boxed())
            }
            None => NextAction::next(create_pod(create_api, pod, create_policy, gate.boxed())),
        },
    )
    .with_policy(policy)
    .boxed()
}

/// Create `pod`, treating "already exists" as success.
fn create_pod(
    api: Arc<dyn ClusterApi>,
    pod: Resource,
    policy: RetryPolicy,
    next: BoxStep,
) -> BoxStep {
    ApiCall::new(
        "CreateServerPod",
        api,
        move |api: &dyn ClusterApi| -> ApiFuture<Option<Resource>> {
            let pending = api.create(pod.clone());
            Box::pin(async move {
                match pending.await {
                    Ok(created) => Ok(Some(created)),
                    Err(ApiError::Conflict(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            })
        },
        move |created: Option<Resource>, _packet: &mut Packet| {
            match created {
                Some(pod) => {
                    info!(pod = %pod.name, namespace = %pod.namespace, "created server pod")
                }
                None => debug!("server pod created concurrently"),
            }
            NextAction::next(next)
        },
    )
    .with_policy(policy)
    .boxed()
}

/// Waits for a resource to report ready, at most `timeout`.
pub struct ReadinessGate {
    api: Arc<dyn ClusterApi>,
    target: ResourceRef,
    server: String,
    timeout: Duration,
    next: BoxStep,
}

impl ReadinessGate {
    pub fn new(
        api: Arc<dyn ClusterApi>,
        target: ResourceRef,
        server: impl Into<String>,
        timeout: Duration,
        next: BoxStep,
    ) -> Self {
        Self {
            api,
            target,
            server: server.into(),
            timeout,
            next,
        }
    }

    pub fn boxed(self) -> BoxStep {
        Box::new(self)
    }
}

impl Step for ReadinessGate {
    // Query first so an already-ready pod never opens a watch; a transient
    // query failure falls back to waiting.
    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        let status = self.api.readiness(&self.target);
        let api = self.api.clone();
        let target = self.target.clone();
        let timeout = self.timeout;
        NextAction::suspend(async move {
            let wait = async move {
                match status.await {
                    Ok(Readiness::Ready) => Ok(()),
                    Ok(Readiness::NotReady) => api.await_ready(&target).await,
                    Err(e) if e.is_transient() => api.await_ready(&target).await,
                    Err(e) => Err(e),
                }
            };
            let result = tokio::time::timeout(timeout, wait).await;
            Box::new(ReadinessChecked { gate: *self, result }) as BoxStep
        })
    }
}

struct ReadinessChecked {
    gate: ReadinessGate,
    result: Result<ApiResult<()>, Elapsed>,
}

impl Step for ReadinessChecked {
    fn name(&self) -> &'static str {
        "ReadinessGate"
    }

    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let ReadinessChecked { gate, result } = *self;
        let message = match result {
            Ok(Ok(())) => {
                info!(server = %gate.server, "server ready");
                return NextAction::next(gate.next);
            }
            Ok(Err(e)) => format!("{} readiness check failed: {e}", gate.server),
            Err(_) => format!("{} not ready within {:?}", gate.server, gate.timeout),
        };
        warn!(server = %gate.server, %message, "server did not become ready");
        packet.record_failure(
            StepFailure::new("ReadinessGate", message).with_subject(&gate.server),
        );
        NextAction::next(gate.next)
    }
}
