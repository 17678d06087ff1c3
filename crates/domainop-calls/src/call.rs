//! A single retrying API call as a pair of steps.
//!
//! [`ApiCall`] issues the request and suspends; the response step either
//! hands the value to the success handler, schedules a retry with backoff
//! for transient errors, or ends the call through the error handler.

use std::sync::Arc;

use domainop_fiber::{BoxStep, FiberError, NextAction, Packet, Step};
use tracing::{debug, warn};

use crate::api::{ApiFuture, ClusterApi};
use crate::error::{ApiError, ApiResult};
use crate::retry::RetryPolicy;

type Request<T> = Arc<dyn Fn(&dyn ClusterApi) -> ApiFuture<T> + Send + Sync>;
type OnSuccess<T> = Box<dyn FnOnce(T, &mut Packet) -> NextAction + Send>;
type OnError = Box<dyn FnOnce(ApiError, &mut Packet) -> NextAction + Send>;

pub struct ApiCall<T> {
    name: &'static str,
    api: Arc<dyn ClusterApi>,
    policy: RetryPolicy,
    attempt: u32,
    request: Request<T>,
    on_success: OnSuccess<T>,
    on_error: Option<OnError>,
}

impl<T: Send + 'static> ApiCall<T> {
    /// `request` may run several times, once per attempt.
    pub fn new<R, S>(
        name: &'static str,
        api: Arc<dyn ClusterApi>,
        request: R,
        on_success: S,
    ) -> Self
    where
        R: Fn(&dyn ClusterApi) -> ApiFuture<T> + Send + Sync + 'static,
        S: FnOnce(T, &mut Packet) -> NextAction + Send + 'static,
    {
        Self {
            name,
            api,
            policy: RetryPolicy::default(),
            attempt: 0,
            request: Arc::new(request),
            on_success: Box::new(on_success),
            on_error: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Handle errors that are not retried. Without a handler the chain
    /// aborts with a fatal error.
    pub fn on_error<E>(mut self, handler: E) -> Self
    where
        E: FnOnce(ApiError, &mut Packet) -> NextAction + Send + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn boxed(self) -> BoxStep {
        Box::new(self)
    }
}

impl<T: Send + 'static> Step for ApiCall<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        let pending = (self.request)(self.api.as_ref());
        NextAction::suspend(async move {
            let result = pending.await;
            Box::new(ApiResponse { call: *self, result }) as BoxStep
        })
    }
}

struct ApiResponse<T> {
    call: ApiCall<T>,
    result: ApiResult<T>,
}

impl<T: Send + 'static> Step for ApiResponse<T> {
    fn name(&self) -> &'static str {
        self.call.name
    }

    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let ApiResponse { mut call, result } = *self;
        match result {
            Ok(value) => (call.on_success)(value, packet),
            Err(e) if e.is_transient() => {
                call.attempt += 1;
                // The engine bounds consecutive retries too; a call whose own
                // policy is tighter stops here.
                if call.attempt > call.policy.max_attempts() {
                    warn!(
                        call = call.name,
                        attempts = call.attempt,
                        error = %e,
                        "call retries exhausted"
                    );
                    return NextAction::abort(FiberError::RetriesExhausted {
                        step: call.name.to_string(),
                        attempts: call.attempt,
                        cause: e.to_string(),
                    });
                }
                let delay = call.policy.delay_for(call.attempt);
                NextAction::retry(delay, e, Box::new(call))
            }
            Err(e) => match call.on_error {
                Some(handler) => {
                    debug!(call = call.name, error = %e, "call failed, handing to error handler");
                    handler(e, packet)
                }
                None => NextAction::abort(FiberError::fatal(call.name, e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use domainop_fiber::{Engine, FiberConfig, FiberOutcome, Key, Terminal};

    use crate::api::{Resource, ResourceKind, ResourceRef};
    use crate::memory::{MemoryCluster, Operation};

    const FOUND: Key<bool> = Key::new("test.found");

    fn fast() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 3)
    }

    fn get_pod(api: Arc<dyn ClusterApi>) -> BoxStep {
        let target = ResourceRef::pod("ns1", "uid1-ms1");
        ApiCall::new(
            "get-pod",
            api,
            move |api| api.get(&target),
            |pod: Option<Resource>, packet| {
                packet.insert(FOUND, pod.is_some());
                NextAction::next(Terminal::boxed())
            },
        )
        .with_policy(fast())
        .boxed()
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let cluster = MemoryCluster::new();
        cluster.insert(Resource::new(ResourceKind::Pod, "ns1", "uid1-ms1"));
        cluster.fail_next(Operation::Get, ApiError::Timeout("get".into()));
        cluster.fail_next(Operation::Get, ApiError::Unavailable("get".into()));

        let engine = Engine::new(fast().fiber_config());
        let outcome = engine.run("call", get_pod(cluster.api()), Packet::new()).await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.packet().get(FOUND), Some(&true));
        assert_eq!(cluster.call_count(Operation::Get), 3);
    }

    #[tokio::test]
    async fn retry_budget_is_enforced() {
        let cluster = MemoryCluster::new();
        for _ in 0..10 {
            cluster.fail_next(Operation::Get, ApiError::TooManyRequests("slow down".into()));
        }
        let engine = Engine::new(FiberConfig { max_retries: 2 });
        let outcome = engine.run("call", get_pod(cluster.api()), Packet::new()).await;
        match outcome {
            FiberOutcome::Failed {
                error: FiberError::RetriesExhausted { step, attempts, .. },
                ..
            } => {
                assert_eq!(step, "get-pod");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn call_policy_bounds_attempts_below_engine_budget() {
        let cluster = MemoryCluster::new();
        for _ in 0..10 {
            cluster.fail_next(Operation::Get, ApiError::Unavailable("apiserver".into()));
        }
        let target = ResourceRef::pod("ns1", "uid1-ms1");
        let call = ApiCall::new(
            "get-pod",
            cluster.api(),
            move |api| api.get(&target),
            |_, _| NextAction::next(Terminal::boxed()),
        )
        .with_policy(RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(1), 1));

        let engine = Engine::new(FiberConfig { max_retries: 10 });
        let outcome = engine.run("call", call.boxed(), Packet::new()).await;

        assert_eq!(
            outcome.error(),
            Some(&FiberError::RetriesExhausted {
                step: "get-pod".to_string(),
                attempts: 2,
                cause: "service unavailable: apiserver".to_string(),
            })
        );
        assert_eq!(cluster.call_count(Operation::Get), 2);
    }

    #[tokio::test]
    async fn final_errors_abort_without_handler() {
        let cluster = MemoryCluster::new();
        cluster.fail_next(Operation::Get, ApiError::Invalid("bad name".into()));
        let outcome = Engine::default()
            .run("call", get_pod(cluster.api()), Packet::new())
            .await;
        assert_eq!(
            outcome.error(),
            Some(&FiberError::fatal("get-pod", "invalid request: bad name"))
        );
    }

    #[tokio::test]
    async fn error_handler_can_continue() {
        let cluster = MemoryCluster::new();
        let target = ResourceRef::pod("ns1", "gone");
        let call = ApiCall::new(
            "delete-pod",
            cluster.api(),
            move |api| api.delete(&target),
            |_, _| NextAction::next(Terminal::boxed()),
        )
        .on_error(|e, packet| {
            packet.insert(FOUND, !e.is_not_found());
            NextAction::next(Terminal::boxed())
        });
        let outcome = Engine::default().run("call", call.boxed(), Packet::new()).await;
        assert!(outcome.is_completed());
        assert_eq!(outcome.packet().get(FOUND), Some(&false));
    }
}
