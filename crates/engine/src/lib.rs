//! Contracts for the external collaborators of the management layer, plus a
//! deterministic in-process simulator implementing them.
//!
//! The management layer (see `velocache-mngt`) never owns a cache line, a
//! metadata page or an I/O request. Those belong to three collaborators it
//! drives through the traits defined here:
//!
//! - [`Engine`] / [`CacheInstance`]: the caching engine owning allocation,
//!   eviction and promotion policy. All mutating entry points are
//!   asynchronous and report through a completion callback that fires exactly
//!   once, from a queue worker thread, never inline from the call.
//! - [`Classifier`]: the I/O classification engine, consumed as a pure
//!   function plus attach/detach hooks.
//! - [`DeviceFactory`]: the block-I/O data path that creates and destroys the
//!   exported block devices applications see.
//!
//! The [`sim`] module provides the only in-repo implementation: a simulator
//! with controllable fault and hold injection, used by the integration tests
//! and the demo CLI.

pub mod classifier;
pub mod contract;
pub mod queue;
pub mod sim;
pub mod volume;

pub use classifier::{ClassId, ClassRule, Classifier, IoDescriptor};
pub use contract::{CacheInstance, CacheRef, Completion, CoreCompletion, CoreHandle, CoreRef, Engine};
pub use queue::{Job, Queue};
pub use volume::DeviceFactory;
