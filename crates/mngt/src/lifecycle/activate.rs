//! Promoting a standby instance to a running one.

use std::sync::Arc;

use tracing::info;
use velocache_core::{ActivateConfig, CacheState, Error, Result};

use crate::manager::CacheManager;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::worker::DeferredWorker;

impl CacheManager {
    /// Activates a standby instance against `cfg`'s device.
    ///
    /// An activation the caller abandoned is always rolled back to a full
    /// stop, whatever the engine reported: a formerly-standby instance whose
    /// promotion nobody observed must not keep running.
    pub fn activate(&self, name: &str, cfg: &ActivateConfig, intr: &Interruptor) -> Result<()> {
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

        // The device must not already serve another instance.
        let mut conflict = None;
        self.inner.engine.visit(&mut |other| {
            if other.name().as_str() != name
                && other.device_path().as_deref() == Some(cfg.device.path.as_str())
            {
                conflict = Some(other.name().as_str().to_string());
            }
        });
        if let Some(holder) = conflict {
            cache.unlock();
            return Err(Error::DeviceIncompatible {
                path: cfg.device.path.clone(),
                reason: format!("device already in use by cache instance '{holder}'"),
            });
        }

        if !cfg.device.force {
            if let Some(recorded) = cache.device_properties() {
                if let Err(reason) = recorded.compatible_with(&cfg.device.properties) {
                    cache.unlock();
                    return Err(Error::DeviceIncompatible {
                        path: cfg.device.path.clone(),
                        reason,
                    });
                }
            }
        }

        let worker = {
            let inner = Arc::clone(&self.inner);
            let target = Arc::clone(&cache);
            match DeferredWorker::spawn(&format!("vc_act_{name}"), move || {
                inner.rollback_started(&target);
            }) {
                Ok(worker) => worker,
                Err(err) => {
                    cache.unlock();
                    return Err(err);
                }
            }
        };

        let (call, completer) = SyncCall::new();
        cache.standby_activate(&cfg.device, completer.into_callback());
        let waker = worker.waker();
        match call.wait_interruptible(intr, move |_status| {
            waker.wake();
        }) {
            WaitOutcome::Interrupted => {
                worker.detach();
                return Err(Error::interrupted("activate"));
            }
            WaitOutcome::Completed(Err(err)) => {
                // The instance is still a valid standby; keep it.
                worker.stop();
                cache.unlock();
                return Err(Error::engine("standby_activate", err));
            }
            WaitOutcome::Completed(Ok(())) => {}
        }

        // Finalize like a fresh start: classification, then the exported
        // devices for every core the metadata brought along.
        let finalize = self.inner.classifier.attach(&cache).and_then(|()| {
            for core in cache.cores() {
                self.inner.devices.create_exported(&cache, &core)?;
            }
            Ok(())
        });
        if let Err(err) = finalize {
            worker.wake();
            worker.join();
            return Err(err);
        }

        worker.stop();
        cache.unlock();
        info!(cache = name, device = %cfg.device.path, "standby instance activated");
        Ok(())
    }
}
