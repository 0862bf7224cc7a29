//! The caching-engine contract consumed by the management layer.
//!
//! Every asynchronous entry point takes a completion callback and invokes it
//! exactly once, with the operation's status, from a queue worker context,
//! never from within the call itself and never twice. A completion firing
//! twice is an unrecoverable contract violation and implementations must
//! abort rather than continue.

use crate::queue::Queue;
use std::sync::Arc;
use velocache_core::{
    CacheId, CacheMode, CacheName, CacheState, CleaningParam, CleaningPolicy, CoreConfig, CoreId,
    DeviceConfig, DeviceProperties, EngineError, EngineResult, SeqCutoffPolicy,
};

/// Completion callback of an asynchronous engine operation.
pub type Completion = Box<dyn FnOnce(EngineResult) + Send + 'static>;

/// Completion callback of `add_core`, which yields the new core handle.
pub type CoreCompletion =
    Box<dyn FnOnce(Result<CoreRef, EngineError>) + Send + 'static>;

/// Shared reference to a cache instance owned by the engine.
///
/// Cloning the `Arc` is the reference-count "get"; dropping it is the "put".
/// Snapshots of stack members hold clones for exactly this reason.
pub type CacheRef = Arc<dyn CacheInstance>;

/// Shared reference to a core (backing) device registered under an instance.
pub type CoreRef = Arc<dyn CoreHandle>;

/// One running or standby cache instance.
///
/// The exclusive management lock and the shared read lock live inside the
/// engine; the management layer only ever requests them through the
/// asynchronous `lock`/`read_lock` entry points and releases them through the
/// synchronous `unlock`/`read_unlock` ones.
pub trait CacheInstance: Send + Sync {
    fn name(&self) -> &CacheName;
    fn id(&self) -> CacheId;
    fn state(&self) -> CacheState;
    fn mode(&self) -> CacheMode;
    fn set_mode(&self, mode: CacheMode);
    fn is_attached(&self) -> bool;
    fn dirty_blocks(&self) -> u64;

    /// Path of the attached cache device, when attached
    fn device_path(&self) -> Option<String>;

    /// Geometry recorded in the instance's metadata, when known
    fn device_properties(&self) -> Option<DeviceProperties>;

    /// Register the queues completions are dispatched through.
    ///
    /// Must be called before the first asynchronous operation on a freshly
    /// started instance.
    fn set_queues(&self, mngt: Arc<Queue>, io: Vec<Arc<Queue>>);

    // -- management locks ---------------------------------------------------

    /// Request the exclusive management lock; completion fires once granted.
    fn lock(&self, completion: Completion);
    fn unlock(&self);
    /// Request the shared read lock; completion fires once granted.
    fn read_lock(&self, completion: Completion);
    fn read_unlock(&self);

    // -- device lifecycle ---------------------------------------------------

    fn attach(&self, cfg: &DeviceConfig, completion: Completion);
    fn load(&self, cfg: &DeviceConfig, completion: Completion);
    fn standby_attach(&self, cfg: &DeviceConfig, completion: Completion);
    fn standby_load(&self, cfg: &DeviceConfig, completion: Completion);
    fn standby_detach(&self, completion: Completion);
    fn standby_activate(&self, cfg: &DeviceConfig, completion: Completion);
    fn stop(&self, completion: Completion);
    /// Persist management metadata to the cache device.
    fn save(&self, completion: Completion);

    // -- dirty data ---------------------------------------------------------

    fn flush(&self, completion: Completion);
    /// Interrupt an in-flight flush; it completes with `FlushingInterrupted`.
    fn flush_interrupt(&self);
    fn purge(&self, completion: Completion);

    // -- core devices -------------------------------------------------------

    fn cores(&self) -> Vec<CoreRef>;
    fn core_count(&self) -> usize;
    fn add_core(&self, cfg: &CoreConfig, completion: CoreCompletion);
    fn remove_core(&self, id: CoreId, completion: Completion);
    fn detach_core(&self, id: CoreId, completion: Completion);
    fn flush_core(&self, id: CoreId, completion: Completion);
    fn purge_core(&self, id: CoreId, completion: Completion);

    // -- tunables -----------------------------------------------------------

    fn cleaning_policy(&self) -> CleaningPolicy;
    fn set_cleaning_policy(&self, policy: CleaningPolicy);
    fn cleaning_param(&self, param: CleaningParam) -> u32;
    fn set_cleaning_param(&self, param: CleaningParam, value: u32);
    /// Instance-wide defaults, applied to every core and inherited by cores
    /// added later.
    fn seq_cutoff_threshold(&self) -> u32;
    fn set_seq_cutoff_threshold(&self, bytes: u32);
    fn seq_cutoff_policy(&self) -> SeqCutoffPolicy;
    fn set_seq_cutoff_policy(&self, policy: SeqCutoffPolicy);
    /// Per-core override of the sequential cutoff.
    fn set_core_seq_cutoff(
        &self,
        id: CoreId,
        policy: SeqCutoffPolicy,
        threshold: u32,
    ) -> EngineResult;
    fn reset_stats(&self);
}

/// One core (backing) device registered under a cache instance.
pub trait CoreHandle: Send + Sync {
    fn id(&self) -> CoreId;
    fn name(&self) -> &CacheName;
    fn path(&self) -> &str;
    fn dirty_blocks(&self) -> u64;
    fn seq_cutoff_policy(&self) -> SeqCutoffPolicy;
    fn seq_cutoff_threshold(&self) -> u32;
}

/// The caching engine itself: the registry of instances and the stack
/// (multi-level) operations spanning more than one of them.
pub trait Engine: Send + Sync {
    fn get_by_name(&self, name: &str) -> Result<CacheRef, EngineError>;
    fn get_by_id(&self, id: CacheId) -> Result<CacheRef, EngineError>;
    fn cache_count(&self) -> usize;

    /// Visit every instance, ordered by id.
    fn visit(&self, f: &mut dyn FnMut(&CacheRef));

    /// Start a new instance. Returns with the instance's exclusive
    /// management lock already held by the caller; the instance is otherwise
    /// uninitialized (no device attached, no queues).
    fn start(&self, cfg: &velocache_core::CacheConfig) -> Result<CacheRef, EngineError>;

    // -- multi-level stacks -------------------------------------------------

    /// Join `upper` on top of the stack `lower` belongs to.
    fn ml_add_cache(&self, lower: &CacheRef, upper: &CacheRef, completion: Completion);

    /// Detach the topmost member from the stack `member` belongs to. The
    /// detached instance survives as a standalone instance the caller is
    /// expected to stop separately.
    fn ml_remove_cache(&self, member: &CacheRef, completion: Completion);

    /// Snapshot the stack `member` belongs to, ordered bottom to top.
    ///
    /// A single-instance "stack" yields just that member. The returned clones
    /// keep every member referenced while the caller works on the snapshot.
    fn ml_collect(&self, member: &CacheRef) -> Vec<CacheRef>;
}
