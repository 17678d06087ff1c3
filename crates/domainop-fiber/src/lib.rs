//! domainop-fiber — cooperative step chains for the domain operator.
//!
//! Reconciliation logic is written as chains of [`Step`]s. Each step is
//! consumed when applied to a [`Packet`] and returns exactly one
//! [`NextAction`], which the [`Engine`] acts on:
//!
//! ```text
//! Engine
//!   └── Fiber (one tokio task per chain)
//!       ├── Continue(next)          → apply next immediately
//!       ├── Suspend(future)         → park until the future yields the next step
//!       ├── Retry { delay, cause }  → sleep, re-apply; bounded consecutive retries
//!       ├── ForkJoin { children }   → child fibers on forked packets, barrier join
//!       ├── Terminate               → Completed(packet)
//!       └── Abort(error)            → Failed { packet, error }
//! ```
//!
//! Steps only run one at a time within a chain, so a chain's packet is never
//! shared. Forked children receive copies; the join step sees their results
//! under [`FORK_RESULTS`] and their failures in the parent's failure list.
//!
//! Cancellation is hierarchical: cancelling a fiber cancels its live
//! children, and the fiber reports [`FiberOutcome::Cancelled`] only after
//! every child has finished.

pub mod cancel;
pub mod engine;
pub mod error;
pub mod packet;
pub mod step;

pub use cancel::CancelToken;
pub use engine::{ChildResult, Engine, FiberConfig, FiberHandle, FiberOutcome, FORK_RESULTS};
pub use error::{FiberError, FiberResult};
pub use packet::{Key, Packet, StepFailure};
pub use step::{BoxStep, Fork, FnStep, NextAction, Step, Suspension, Terminal};
