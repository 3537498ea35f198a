//! Async orchestration primitives
//!
//! - [`chain::TaskChain`]: per-entity sequential commit runner with
//!   last-commit-wins semantics
//! - [`queue::WorkQueue`]: process-wide bounded-concurrency priority executor
//!   for external invocations

pub mod chain;
pub mod queue;

pub use chain::TaskChain;
pub use queue::{QueueClosed, WorkQueue};
