//! Attaching a cache device to a detached standby instance.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;
use velocache_core::{engine_status, CacheState, DeviceConfig, EngineResult, Error, Result};

use crate::manager::CacheManager;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::worker::DeferredWorker;

impl CacheManager {
    /// Attaches `cfg`'s device to a detached standby instance.
    ///
    /// If the caller is interrupted and the attach then succeeds, the device
    /// is detached again by the deferred worker: an attach nobody observed
    /// must not stand.
    pub fn attach_device(&self, name: &str, cfg: &DeviceConfig, intr: &Interruptor) -> Result<()> {
        cfg.validate()?;
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;

        if cache.state() != CacheState::Standby {
            let actual = cache.state();
            cache.unlock();
            return Err(Error::WrongState {
                name: name.to_string(),
                expected: CacheState::Standby,
                actual,
            });
        }
        if cache.is_attached() {
            cache.unlock();
            return Err(Error::InvalidConfig {
                message: format!("cache instance '{name}' already has a device attached"),
            });
        }
        if !cfg.force {
            if let Some(recorded) = cache.device_properties() {
                if let Err(reason) = recorded.compatible_with(&cfg.properties) {
                    cache.unlock();
                    return Err(Error::DeviceIncompatible {
                        path: cfg.path.clone(),
                        reason,
                    });
                }
            }
        }

        let status_slot: Arc<Mutex<Option<EngineResult>>> = Arc::new(Mutex::new(None));
        let worker = {
            let target = Arc::clone(&cache);
            let slot = Arc::clone(&status_slot);
            match DeferredWorker::spawn(&format!("vc_det_{name}"), move || {
                let attached = matches!(slot.lock().take(), Some(Ok(())));
                if attached {
                    let (call, completer) = SyncCall::new();
                    target.standby_detach(completer.into_callback());
                    let _ = call.wait();
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

        let (call, completer) = SyncCall::new();
        cache.standby_attach(cfg, completer.into_callback());
        let waker = worker.waker();
        let slot = Arc::clone(&status_slot);
        match call.wait_interruptible(intr, move |status| {
            *slot.lock() = Some(status);
            waker.wake();
        }) {
            WaitOutcome::Interrupted => {
                worker.detach();
                Err(Error::interrupted("attach_device"))
            }
            WaitOutcome::Completed(status) => {
                worker.stop();
                let result = engine_status("standby_attach", status);
                cache.unlock();
                if result.is_ok() {
                    info!(cache = name, device = %cfg.path, "cache device attached");
                }
                result
            }
        }
    }

    /// Detaches a standby instance's cache device, keeping the instance up
    /// so a different device can be attached later.
    pub fn detach_device(&self, name: &str, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;
        if cache.state() != CacheState::Standby {
            let actual = cache.state();
            cache.unlock();
            return Err(Error::WrongState {
                name: name.to_string(),
                expected: CacheState::Standby,
                actual,
            });
        }
        let (call, completer) = SyncCall::new();
        cache.standby_detach(completer.into_callback());
        let status = call.wait();
        cache.unlock();
        engine_status("standby_detach", status)?;
        info!(cache = name, "cache device detached");
        Ok(())
    }
}
