//! Removing the topmost member of a multi-level cache stack.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use velocache_core::{EngineResult, Error, Result};

use crate::manager::CacheManager;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::worker::DeferredWorker;

impl CacheManager {
    /// Detaches the topmost member from its stack and stops it.
    ///
    /// The stack is snapshotted first (the clones keep every member alive),
    /// then locked bottom to top; the topology is re-verified under the
    /// locks, and a mismatch releases everything and reports
    /// `TopologyChanged` so the caller can retry against the new shape.
    pub fn remove_from_stack(&self, name: &str, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        let members = stack::snapshot(self.inner.engine.as_ref(), &cache);

        if members.len() < 2 {
            return Err(Error::InvalidConfig {
                message: format!("cache instance '{name}' is not part of a multi-level stack"),
            });
        }
        let is_top = members
            .last()
            .is_some_and(|top| top.name().as_str() == name);
        if !is_top {
            return Err(Error::NotTopmost {
                name: name.to_string(),
            });
        }

        stack::lock_all(&members, intr)?;

        // Another stack operation may have slipped in between the snapshot
        // and the last lock grant.
        let fresh = stack::snapshot(self.inner.engine.as_ref(), &cache);
        if !stack::same_topology(&members, &fresh) {
            stack::unlock_all(&members);
            return Err(Error::TopologyChanged {
                operation: "remove_from_stack".to_string(),
            });
        }

        let status_slot: Arc<Mutex<Option<EngineResult>>> = Arc::new(Mutex::new(None));
        let worker = {
            let inner = Arc::clone(&self.inner);
            let held = members.clone();
            let target = Arc::clone(&cache);
            let slot = Arc::clone(&status_slot);
            match DeferredWorker::spawn(&format!("vc_rm_{name}"), move || {
                let status = slot.lock().take().unwrap_or(Ok(()));
                match status {
                    Ok(()) => {
                        // The target is standalone now; release the survivors
                        // top to bottom, then stop it under its own lock.
                        stack::unlock_all(&held[..held.len() - 1]);
                        if let Err(err) = inner.devices.destroy_all_exported(&target) {
                            warn!(cache = %target.name(), error = %err,
                                "destroying exported devices failed during stack removal");
                        }
                        let stop_status = stack::stop_sync(&target);
                        inner.finish_teardown(&target, stop_status);
                    }
                    Err(_) => stack::unlock_all(&held),
                }
            }) {
                Ok(worker) => worker,
                Err(err) => {
                    stack::unlock_all(&members);
                    return Err(err);
                }
            }
        };

        let (call, completer) = SyncCall::new();
        self.inner
            .engine
            .ml_remove_cache(&cache, completer.into_callback());
        let waker = worker.waker();
        let slot = Arc::clone(&status_slot);
        match call.wait_interruptible(intr, move |status| {
            *slot.lock() = Some(status);
            waker.wake();
        }) {
            WaitOutcome::Interrupted => {
                worker.detach();
                Err(Error::interrupted("remove_from_stack"))
            }
            WaitOutcome::Completed(status) => {
                *status_slot.lock() = Some(status);
                worker.wake();
                worker.join();
                match status {
                    Ok(()) => {
                        info!(cache = name, "removed from cache stack and stopped");
                        Ok(())
                    }
                    Err(err) => Err(Error::engine("ml_remove_cache", err)),
                }
            }
        }
    }
}
