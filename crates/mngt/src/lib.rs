//! The cache lifecycle management layer.
//!
//! The engine exposes purely asynchronous, completion-callback management
//! operations; this crate turns them into operations a caller can invoke
//! synchronously, safely interrupt, and safely unwind on partial failure,
//! including across multi-level stacks of cooperating instances.
//!
//! Structure:
//! - [`sync`]: the blocking bridge over completion callbacks, with
//!   interruption and the abandoned-call ownership race.
//! - [`worker`]: one-shot deferred worker threads for rollback continuations.
//! - [`queues`]: the per-instance worker threads draining engine queues.
//! - [`visitor`] and [`stack`]: ordered stack traversal with compensating
//!   rollback, and the bottom-to-top lock ordering built on it.
//! - [`manager`] and the `lifecycle` modules: the orchestrator itself.

pub mod manager;
pub mod queues;
pub mod stack;
pub mod sync;
pub mod visitor;
pub mod worker;

mod lifecycle;

pub use manager::CacheManager;
pub use sync::{Completer, Interruptor, OpResult, SyncCall, WaitOutcome};
pub use visitor::Direction;
pub use worker::{DeferredWorker, WorkerWaker};
