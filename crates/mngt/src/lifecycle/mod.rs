//! The management operations, grouped by concern.
//!
//! Every module here is an `impl CacheManager` block. They share one shape:
//! validate locally, take the instance lock, drive the engine through the
//! blocking bridge, and unwind through the engine's inverse operation on a
//! deferred worker when the caller cannot.

mod activate;
mod attach;
mod core_ops;
mod params;
mod stack_ops;
mod start;
mod stop;
