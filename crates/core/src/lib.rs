//! Core domain types, errors, and constants for the `velocache` workspace.
//!
//! This crate establishes the foundational data structures and error handling
//! mechanisms used throughout the entire codebase.
//!
//! ## Key Components
//!
//! - **`errors`**: Defines the primary `Error` enum and `Result` type alias,
//!   centralizing all possible failure modes for predictable error handling,
//!   plus the status codes the caching engine reports through completions.
//! - **`types`**: Domain-specific newtype wrappers and data structures like
//!   [`CacheName`] and [`CacheId`] to enforce invariants at the type level.
//! - **`config`**: The configuration structs a management operation is built
//!   from, with their validation rules.
//! - **`constants`**: Shared limits such as the maximum cache id.

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

pub use self::{
    config::{ActivateConfig, CacheConfig, CoreConfig, DeviceConfig, InitMode, StartRequest},
    constants::*,
    errors::{engine_status, EngineError, EngineResult, Error, Result},
    types::{
        CacheId, CacheMode, CacheName, CacheState, CleaningParam, CleaningPolicy, CoreId,
        DeviceProperties, InstanceInfo, SeqCutoffPolicy,
    },
};
