//! Core (backing) device management under a running instance.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use velocache_core::{engine_status, CoreConfig, CoreId, EngineError, Error, Result};
use velocache_engine::{CacheRef, CoreRef};

use crate::manager::CacheManager;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::worker::DeferredWorker;

impl CacheManager {
    /// Adds a core device and exposes its exported block device.
    ///
    /// If the caller walks away and the engine add then succeeds, the worker
    /// removes the core again; a core nobody was told about must not serve
    /// I/O. The same inverse runs when the exported device cannot be created.
    pub fn add_core(&self, name: &str, cfg: &CoreConfig, intr: &Interruptor) -> Result<CoreId> {
        cfg.validate()?;
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;

        type CoreSlot = Arc<Mutex<Option<std::result::Result<CoreRef, EngineError>>>>;
        let core_slot: CoreSlot = Arc::new(Mutex::new(None));
        let worker = {
            let target = Arc::clone(&cache);
            let slot = Arc::clone(&core_slot);
            match DeferredWorker::spawn(&format!("vc_addcore_{name}"), move || {
                if let Some(Ok(core)) = slot.lock().take() {
                    remove_core_sync(&target, core.id());
                }
                target.unlock();
            }) {
                Ok(worker) => worker,
                Err(err) => {
                    cache.unlock();
                    return Err(err);
                }
            }
        };

        let (call, completer) = SyncCall::<CoreRef>::new();
        cache.add_core(cfg, completer.into_callback());
        let waker = worker.waker();
        let slot = Arc::clone(&core_slot);
        match call.wait_interruptible(intr, move |result| {
            *slot.lock() = Some(result);
            waker.wake();
        }) {
            WaitOutcome::Interrupted => {
                worker.detach();
                Err(Error::interrupted("add_core"))
            }
            WaitOutcome::Completed(Err(err)) => {
                worker.stop();
                cache.unlock();
                Err(Error::engine("add_core", err))
            }
            WaitOutcome::Completed(Ok(core)) => {
                if let Err(err) = self.inner.devices.create_exported(&cache, &core) {
                    *core_slot.lock() = Some(Ok(core));
                    worker.wake();
                    worker.join();
                    return Err(err);
                }
                worker.stop();
                let id = core.id();
                cache.unlock();
                info!(cache = name, core = %cfg.name, id = %id, "core device added");
                Ok(id)
            }
        }
    }

    /// Removes a core device: optional interruptible flush, exported device
    /// gone before the engine removal. A failed removal re-exposes the
    /// exported device so the core stays usable.
    pub fn remove_core(
        &self,
        name: &str,
        core_id: CoreId,
        flush: bool,
        intr: &Interruptor,
    ) -> Result<()> {
        self.drop_core(name, core_id, flush, false, intr)
    }

    /// Detaches a core device, keeping its configuration registered so a
    /// later load can bring it back.
    pub fn detach_core(
        &self,
        name: &str,
        core_id: CoreId,
        flush: bool,
        intr: &Interruptor,
    ) -> Result<()> {
        self.drop_core(name, core_id, flush, true, intr)
    }

    fn drop_core(
        &self,
        name: &str,
        core_id: CoreId,
        flush: bool,
        detach_only: bool,
        intr: &Interruptor,
    ) -> Result<()> {
        let cache = self.inner.get(name)?;
        let instance_priv = self.inner.priv_of(name)?;
        stack::lock_sync(&cache, intr)?;

        let Some(core) = cache.cores().into_iter().find(|c| c.id() == core_id) else {
            cache.unlock();
            return Err(Error::NotFound {
                name: format!("{name}/core{}", core_id.get()),
            });
        };

        if flush && cache.is_attached() {
            if let Err(err) = self
                .inner
                .flush_core_sync(&cache, core_id, &instance_priv, intr)
            {
                cache.unlock();
                return Err(err);
            }
        }

        if let Err(err) = self.inner.devices.destroy_exported(&cache, &core) {
            cache.unlock();
            return Err(err);
        }

        let op = if detach_only { "detach_core" } else { "remove_core" };
        let (call, completer) = SyncCall::new();
        if detach_only {
            cache.detach_core(core_id, completer.into_callback());
        } else {
            cache.remove_core(core_id, completer.into_callback());
        }
        let status = call.wait();
        if status.is_err() {
            // The core survives; give it its exported device back.
            let _ = self.inner.devices.create_exported(&cache, &core);
        }
        cache.unlock();
        engine_status(op, status)?;
        info!(cache = name, core = %core_id, detach_only, "core device removed");
        Ok(())
    }
}

/// Blocking engine core removal, used from rollback contexts where the
/// outcome can only be logged.
fn remove_core_sync(cache: &CacheRef, core_id: CoreId) {
    let (call, completer) = SyncCall::new();
    cache.remove_core(core_id, completer.into_callback());
    if let Err(err) = call.wait() {
        tracing::warn!(cache = %cache.name(), core = %core_id, error = %err,
            "rolling back core addition failed");
    }
}
