//! Instance teardown.
//!
//! Stop is the one operation that must finish even when its caller does not.
//! The final engine stop runs through a pre-spawned worker: whichever side
//! loses the race between the caller's wait and the completion hands the
//! teardown to that worker, so the instance always ends fully removed.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};
use velocache_core::{CacheState, EngineError, EngineResult, Error, Result};

use crate::manager::CacheManager;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::worker::DeferredWorker;

impl CacheManager {
    /// Flushes (when asked) and stops a cache instance.
    ///
    /// The flush phase runs under the shared read lock and is interruptible;
    /// a flush cut short aborts the stop and leaves the instance running.
    /// Once the exclusive lock is taken the stop is committed: exported
    /// devices go first, a final uninterruptible flush drains what it can,
    /// and the engine stop concludes on whichever thread wins the race.
    ///
    /// Error ranking: an engine stop failure outranks `StoppedDirty`;
    /// `Interrupted` is never combined with either.
    pub fn exit_instance(&self, name: &str, flush: bool, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        let instance_priv = self.inner.priv_of(name)?;

        // Phase 1: drain dirty data while I/O is still flowing.
        if flush && cache.is_attached() && cache.state() == CacheState::Running {
            stack::read_lock_sync(&cache, intr)?;
            let flushed = self.inner.flush_sync(&cache, &instance_priv, true, intr);
            cache.read_unlock();
            match flushed {
                Ok(()) => {}
                Err(err) if err.is_interrupted() => return Err(err),
                Err(
                    err @ Error::Engine {
                        source:
                            EngineError::FlushingInterrupted | EngineError::IncompleteState,
                        ..
                    },
                ) => return Err(err),
                Err(err) => {
                    // Retried under the exclusive lock below.
                    warn!(cache = name, error = %err, "pre-stop flush failed");
                }
            }
        }

        stack::lock_sync(&cache, intr)?;

        // Exported devices die before the engine does, so no application I/O
        // can observe a half-stopped cache.
        if let Err(err) = self.inner.devices.destroy_all_exported(&cache) {
            warn!(cache = name, error = %err, "destroying exported devices failed");
        }

        let mut dirty = false;
        if cache.is_attached() && cache.state() == CacheState::Running {
            if flush {
                let final_flush =
                    self.inner
                        .flush_sync(&cache, &instance_priv, false, &Interruptor::new());
                if let Err(err) = final_flush {
                    warn!(cache = name, error = %err, "final flush failed, stopping dirty");
                    dirty = true;
                }
            } else {
                dirty = cache.dirty_blocks() > 0;
            }
        }

        let status_slot: Arc<Mutex<Option<EngineResult>>> = Arc::new(Mutex::new(None));
        let worker = {
            let inner = Arc::clone(&self.inner);
            let target = Arc::clone(&cache);
            let slot = Arc::clone(&status_slot);
            match DeferredWorker::spawn(&format!("vc_stop_{name}"), move || {
                let status = slot.lock().take().unwrap_or(Ok(()));
                inner.finish_teardown(&target, status);
            }) {
                Ok(worker) => worker,
                Err(spawn_err) => {
                    // No worker, no interruptible wait: stop in the
                    // foreground instead.
                    warn!(cache = name, error = %spawn_err, "stopping in the foreground");
                    let status = stack::stop_sync(&cache);
                    self.inner.finish_teardown(&cache, status);
                    return match status {
                        Ok(()) if dirty => Err(Error::StoppedDirty),
                        Ok(()) => Ok(()),
                        Err(err) => Err(Error::engine("stop", err)),
                    };
                }
            }
        };

        let (call, completer) = SyncCall::new();
        cache.stop(completer.into_callback());
        let waker = worker.waker();
        let slot = Arc::clone(&status_slot);
        match call.wait_interruptible(intr, move |status| {
            *slot.lock() = Some(status);
            waker.wake();
        }) {
            WaitOutcome::Interrupted => {
                worker.detach();
                Err(Error::interrupted("stop"))
            }
            WaitOutcome::Completed(status) => {
                *status_slot.lock() = Some(status);
                worker.wake();
                worker.join();
                match status {
                    Err(err) => Err(Error::engine("stop", err)),
                    Ok(()) if dirty => {
                        warn!(cache = name, "instance stopped with dirty data remaining");
                        Err(Error::StoppedDirty)
                    }
                    Ok(()) => {
                        info!(cache = name, "cache instance stopped");
                        Ok(())
                    }
                }
            }
        }
    }
}
