//! Blocking lock adapters and stack-wide lock ordering.
//!
//! The engine grants its management locks through completion callbacks; the
//! helpers here turn those into blocking calls. Stack-wide operations take
//! every member's lock bottom to top and release top to bottom, which keeps
//! two concurrent stack operations from deadlocking against each other.

use std::sync::Arc;

use velocache_core::{engine_status, EngineResult, Error, Result};
use velocache_engine::{CacheRef, Engine};

use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::visitor::{visit, Direction};

/// Takes the exclusive management lock, giving up if `intr` is raised. An
/// abandoned grant is released by whoever delivers it.
pub fn lock_sync(cache: &CacheRef, intr: &Interruptor) -> Result<()> {
    let (call, completer) = SyncCall::new();
    cache.lock(completer.into_callback());
    let abandoned = Arc::clone(cache);
    match call.wait_interruptible(intr, move |status| {
        if status.is_ok() {
            abandoned.unlock();
        }
    }) {
        WaitOutcome::Completed(status) => engine_status("lock", status),
        WaitOutcome::Interrupted => Err(Error::interrupted("lock")),
    }
}

/// Takes the shared read lock, giving up if `intr` is raised.
pub fn read_lock_sync(cache: &CacheRef, intr: &Interruptor) -> Result<()> {
    let (call, completer) = SyncCall::new();
    cache.read_lock(completer.into_callback());
    let abandoned = Arc::clone(cache);
    match call.wait_interruptible(intr, move |status| {
        if status.is_ok() {
            abandoned.read_unlock();
        }
    }) {
        WaitOutcome::Completed(status) => engine_status("read_lock", status),
        WaitOutcome::Interrupted => Err(Error::interrupted("read_lock")),
    }
}

/// Persists management metadata and waits for the write to land.
pub fn save_sync(cache: &CacheRef) -> Result<()> {
    let (call, completer) = SyncCall::new();
    cache.save(completer.into_callback());
    engine_status("save", call.wait())
}

/// Stops the instance and waits. Never interruptible: a stop that has begun
/// must run to its verdict. The raw status is returned because stop failures
/// need finer dispatch than a wrapped error allows.
pub fn stop_sync(cache: &CacheRef) -> EngineResult {
    let (call, completer) = SyncCall::new();
    cache.stop(completer.into_callback());
    call.wait()
}

/// Snapshot of the stack `member` belongs to, ordered bottom to top.
pub fn snapshot(engine: &dyn Engine, member: &CacheRef) -> Vec<CacheRef> {
    engine.ml_collect(member)
}

/// True when the two snapshots list the same members in the same order.
pub fn same_topology(a: &[CacheRef], b: &[CacheRef]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| x.name() == y.name() && x.id() == y.id())
}

/// Locks every member bottom to top. On failure or interruption the members
/// already locked are released again, top to bottom.
pub fn lock_all(members: &[CacheRef], intr: &Interruptor) -> Result<()> {
    visit(
        members,
        Direction::BottomUp,
        |member| lock_sync(member, intr),
        |member| member.unlock(),
    )
}

/// Releases every member's management lock, top to bottom.
pub fn unlock_all(members: &[CacheRef]) {
    for member in members.iter().rev() {
        member.unlock();
    }
}
