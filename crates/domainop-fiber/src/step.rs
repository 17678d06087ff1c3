//! Steps and the scheduling instructions they return.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::FiberError;
use crate::packet::Packet;

/// An owned chain: a step that owns the rest of its chain.
pub type BoxStep = Box<dyn Step>;

/// A parked chain. Resolves to the step to run once the wait is over.
pub type Suspension = Pin<Box<dyn Future<Output = BoxStep> + Send + 'static>>;

/// One link of a chain.
///
/// `apply` consumes the step, so a chain is always exclusively owned and
/// cannot contain cycles. A step that wants to run again (for a retry)
/// hands itself back inside the instruction.
pub trait Step: Send + 'static {
    /// Short name used in logs and failure reports.
    fn name(&self) -> &'static str {
        short_type_name(std::any::type_name::<Self>())
    }

    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction;
}

/// What the engine should do after a step ran.
pub enum NextAction {
    /// Run `next` immediately.
    Continue(BoxStep),
    /// Park the chain until the future yields the next step.
    Suspend(Suspension),
    /// Run `step` again after `delay`.
    Retry {
        delay: Duration,
        cause: String,
        step: BoxStep,
    },
    /// Run every child on its own forked packet, then `join` once all
    /// children have finished.
    ForkJoin { children: Vec<Fork>, join: BoxStep },
    /// The chain finished.
    Terminate,
    /// The chain failed and must not be retried by the engine.
    Abort(FiberError),
}

/// A named child chain of a fork-join.
pub struct Fork {
    pub name: String,
    pub chain: BoxStep,
}

impl Fork {
    pub fn new(name: impl Into<String>, chain: BoxStep) -> Self {
        Self {
            name: name.into(),
            chain,
        }
    }
}

impl NextAction {
    pub fn next(step: BoxStep) -> Self {
        NextAction::Continue(step)
    }

    /// Park until `future` completes, then continue with its output.
    pub fn suspend<F>(future: F) -> Self
    where
        F: Future<Output = BoxStep> + Send + 'static,
    {
        NextAction::Suspend(Box::pin(future))
    }

    /// Park for `delay`, then continue with `next`.
    pub fn after(delay: Duration, next: BoxStep) -> Self {
        Self::suspend(async move {
            tokio::time::sleep(delay).await;
            next
        })
    }

    pub fn retry(delay: Duration, cause: impl ToString, step: BoxStep) -> Self {
        NextAction::Retry {
            delay,
            cause: cause.to_string(),
            step,
        }
    }

    pub fn fork_join(children: Vec<Fork>, join: BoxStep) -> Self {
        NextAction::ForkJoin { children, join }
    }

    pub fn abort(error: FiberError) -> Self {
        NextAction::Abort(error)
    }
}

impl fmt::Debug for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NextAction::Continue(step) => write!(f, "Continue({})", step.name()),
            NextAction::Suspend(_) => f.write_str("Suspend"),
            NextAction::Retry {
                delay, cause, step, ..
            } => write!(f, "Retry({}, {delay:?}, {cause})", step.name()),
            NextAction::ForkJoin { children, join } => {
                write!(f, "ForkJoin({} children, join {})", children.len(), join.name())
            }
            NextAction::Terminate => f.write_str("Terminate"),
            NextAction::Abort(e) => write!(f, "Abort({e})"),
        }
    }
}

/// End of every chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct Terminal;

impl Terminal {
    pub fn boxed() -> BoxStep {
        Box::new(Terminal)
    }
}

impl Step for Terminal {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    fn apply(self: Box<Self>, _packet: &mut Packet) -> NextAction {
        NextAction::Terminate
    }
}

/// Runs a closure against the packet, then continues with `next`.
pub struct FnStep<F> {
    name: &'static str,
    f: F,
    next: BoxStep,
}

impl<F> FnStep<F>
where
    F: FnOnce(&mut Packet) + Send + 'static,
{
    pub fn new(name: &'static str, f: F, next: BoxStep) -> Self {
        Self { name, f, next }
    }

    pub fn boxed(name: &'static str, f: F, next: BoxStep) -> BoxStep {
        Box::new(Self::new(name, f, next))
    }
}

impl<F> Step for FnStep<F>
where
    F: FnOnce(&mut Packet) + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn apply(self: Box<Self>, packet: &mut Packet) -> NextAction {
        let FnStep { f, next, .. } = *self;
        f(packet);
        NextAction::Continue(next)
    }
}

/// `a::b::Thing<c::D>` → `Thing`.
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
