//! Fiber engine — drives a chain from its first step to a terminal outcome.
//!
//! Each fiber is an ordinary tokio future. Suspended fibers hold no worker
//! thread; forked children are spawned as separate tasks and may resume on
//! any worker.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{FiberError, FiberResult};
use crate::packet::{Key, Packet, StepFailure};
use crate::step::{BoxStep, Fork, NextAction};

/// Results of the most recent fork-join, in child order.
pub const FORK_RESULTS: Key<Vec<ChildResult>> = Key::new("fiber.fork_results");

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberConfig {
    /// Consecutive retries a chain may request before it fails.
    pub max_retries: u32,
}

impl Default for FiberConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// How a fiber ended. Every variant hands the packet back.
#[derive(Debug, Clone)]
pub enum FiberOutcome {
    Completed(Packet),
    Failed { packet: Packet, error: FiberError },
    Cancelled(Packet),
}

impl FiberOutcome {
    pub fn packet(&self) -> &Packet {
        match self {
            FiberOutcome::Completed(packet)
            | FiberOutcome::Failed { packet, .. }
            | FiberOutcome::Cancelled(packet) => packet,
        }
    }

    pub fn into_packet(self) -> Packet {
        match self {
            FiberOutcome::Completed(packet)
            | FiberOutcome::Failed { packet, .. }
            | FiberOutcome::Cancelled(packet) => packet,
        }
    }

    pub fn error(&self) -> Option<&FiberError> {
        match self {
            FiberOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, FiberOutcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FiberOutcome::Cancelled(_))
    }
}

/// Terminal result of one forked child.
#[derive(Debug, Clone)]
pub struct ChildResult {
    pub name: String,
    pub outcome: FiberOutcome,
}

/// Runs chains as fibers.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: FiberConfig,
}

impl Engine {
    pub fn new(config: FiberConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FiberConfig {
        &self.config
    }

    /// Drive a chain on the current task until it ends.
    pub async fn run(
        &self,
        name: impl Into<String>,
        chain: BoxStep,
        packet: Packet,
    ) -> FiberOutcome {
        self.run_with_token(name, chain, packet, CancelToken::new())
            .await
    }

    /// Like [`Engine::run`], observing an externally owned token.
    pub async fn run_with_token(
        &self,
        name: impl Into<String>,
        chain: BoxStep,
        packet: Packet,
        token: CancelToken,
    ) -> FiberOutcome {
        let fiber = Fiber {
            name: name.into(),
            config: self.config.clone(),
            token,
        };
        fiber.drive(chain, packet).await
    }

    /// Spawn a chain as its own task.
    pub fn start(&self, name: impl Into<String>, chain: BoxStep, packet: Packet) -> FiberHandle {
        let name = name.into();
        let token = CancelToken::new();
        let fiber = Fiber {
            name: name.clone(),
            config: self.config.clone(),
            token: token.clone(),
        };
        let task = tokio::spawn(fiber.drive(chain, packet));
        debug!(fiber = %name, "fiber started");
        FiberHandle { name, token, task }
    }
}

/// Handle to a spawned fiber.
pub struct FiberHandle {
    name: String,
    token: CancelToken,
    task: JoinHandle<FiberOutcome>,
}

impl FiberHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cancellation. The fiber and all its live children stop at
    /// their next resumption point.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the fiber to end.
    pub async fn join(self) -> FiberResult<FiberOutcome> {
        self.task.await.map_err(|e| FiberError::Panicked {
            fiber: self.name,
            message: panic_message(e),
        })
    }
}

type FiberFuture = Pin<Box<dyn Future<Output = FiberOutcome> + Send + 'static>>;

struct Fiber {
    name: String,
    config: FiberConfig,
    token: CancelToken,
}

impl Fiber {
    // Boxed so fork-join can spawn child fibers from inside the loop.
    fn drive(self, chain: BoxStep, packet: Packet) -> FiberFuture {
        Box::pin(self.run_loop(chain, packet))
    }

    async fn run_loop(self, mut step: BoxStep, mut packet: Packet) -> FiberOutcome {
        let mut retries: u32 = 0;

        loop {
            if self.token.is_cancelled() {
                debug!(fiber = %self.name, step = step.name(), "fiber cancelled");
                return FiberOutcome::Cancelled(packet);
            }

            match step.apply(&mut packet) {
                NextAction::Continue(next) => {
                    retries = 0;
                    step = next;
                }
                // A resolved suspension is not progress on its own: call
                // steps suspend on the request and retry from the response.
                NextAction::Suspend(suspension) => {
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => {
                            debug!(fiber = %self.name, "fiber cancelled while suspended");
                            return FiberOutcome::Cancelled(packet);
                        }
                        next = suspension => step = next,
                    }
                }
                NextAction::Retry {
                    delay,
                    cause,
                    step: again,
                } => {
                    retries += 1;
                    if retries > self.config.max_retries {
                        warn!(
                            fiber = %self.name,
                            step = again.name(),
                            attempts = retries,
                            %cause,
                            "retries exhausted"
                        );
                        return FiberOutcome::Failed {
                            packet,
                            error: FiberError::RetriesExhausted {
                                step: again.name().to_string(),
                                attempts: retries,
                                cause,
                            },
                        };
                    }
                    warn!(
                        fiber = %self.name,
                        step = again.name(),
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        %cause,
                        "step will be retried"
                    );
                    tokio::select! {
                        biased;
                        _ = self.token.cancelled() => {
                            debug!(fiber = %self.name, "fiber cancelled during retry backoff");
                            return FiberOutcome::Cancelled(packet);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    step = again;
                }
                NextAction::ForkJoin { children, join } => {
                    retries = 0;
                    self.fork_join(children, &mut packet).await;
                    step = join;
                }
                NextAction::Terminate => {
                    debug!(fiber = %self.name, "fiber completed");
                    return FiberOutcome::Completed(packet);
                }
                NextAction::Abort(error) => {
                    warn!(fiber = %self.name, %error, "fiber aborted");
                    return FiberOutcome::Failed { packet, error };
                }
            }
        }
    }

    /// Spawn every child, wait for all of them, merge results into `packet`.
    async fn fork_join(&self, children: Vec<Fork>, packet: &mut Packet) {
        if children.is_empty() {
            packet.insert(FORK_RESULTS, Vec::new());
            return;
        }
        debug!(fiber = %self.name, children = children.len(), "forking");

        let handles: Vec<(String, JoinHandle<FiberOutcome>)> = children
            .into_iter()
            .map(|fork| {
                let child = Fiber {
                    name: format!("{}/{}", self.name, fork.name),
                    config: self.config.clone(),
                    token: self.token.child(),
                };
                let task = tokio::spawn(child.drive(fork.chain, packet.fork()));
                (fork.name, task)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (name, task) in handles {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => FiberOutcome::Failed {
                    packet: Packet::new(),
                    error: FiberError::Panicked {
                        fiber: format!("{}/{}", self.name, name),
                        message: panic_message(e),
                    },
                },
            };
            packet.extend_failures(outcome.packet().failures());
            if let FiberOutcome::Failed { error, .. } = &outcome {
                packet.record_failure(
                    StepFailure::from_error(name.clone(), error).with_subject(name.clone()),
                );
            }
            results.push(ChildResult { name, outcome });
        }

        debug!(fiber = %self.name, children = results.len(), "joined");
        packet.insert(FORK_RESULTS, results);
    }
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
