//! The cache lifecycle orchestrator.
//!
//! [`CacheManager`] owns everything the engine does not: per-instance queue
//! workers, classification hookup, exported-device lifetimes and the
//! interruption bookkeeping. The operations themselves live in the
//! [`crate::lifecycle`] modules as `impl CacheManager` blocks; this module
//! holds the shared state and the teardown paths they all funnel through.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use velocache_core::{engine_status, EngineError, EngineResult, Error, Result};
use velocache_engine::{CacheRef, Classifier, DeviceFactory, Engine};

use crate::queues::QueueSet;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};

/// Per-instance state owned by the management layer rather than the engine.
pub(crate) struct InstancePriv {
    /// Queue workers; taken out once, during teardown.
    pub(crate) queues: Mutex<Option<QueueSet>>,
    /// True only while an interruptible flush on this instance is waiting.
    pub(crate) flush_interrupt_enabled: AtomicBool,
}

impl InstancePriv {
    pub(crate) fn new(queues: QueueSet) -> Arc<Self> {
        Arc::new(InstancePriv {
            queues: Mutex::new(Some(queues)),
            flush_interrupt_enabled: AtomicBool::new(false),
        })
    }
}

pub(crate) struct ManagerInner {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) classifier: Arc<dyn Classifier>,
    pub(crate) devices: Arc<dyn DeviceFactory>,
    pub(crate) privs: Mutex<HashMap<String, Arc<InstancePriv>>>,
}

impl ManagerInner {
    pub(crate) fn get(&self, name: &str) -> Result<CacheRef> {
        self.engine.get_by_name(name).map_err(|_| Error::NotFound {
            name: name.to_string(),
        })
    }

    pub(crate) fn priv_of(&self, name: &str) -> Result<Arc<InstancePriv>> {
        self.privs
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    pub(crate) fn insert_priv(&self, name: &str, instance_priv: Arc<InstancePriv>) {
        self.privs.lock().insert(name.to_string(), instance_priv);
    }

    pub(crate) fn remove_priv(&self, name: &str) -> Option<Arc<InstancePriv>> {
        self.privs.lock().remove(name)
    }

    /// Blocking flush of the whole instance. While an interruptible flush is
    /// waiting here it can be cut short both by `intr` and by
    /// `interrupt_flushing` on another thread.
    ///
    /// A caller interrupt also interrupts the engine-side flush, so the work
    /// being abandoned winds down instead of running to completion unseen.
    pub(crate) fn flush_sync(
        &self,
        cache: &CacheRef,
        instance_priv: &InstancePriv,
        interruptible: bool,
        intr: &Interruptor,
    ) -> Result<()> {
        let (call, completer) = SyncCall::new();
        if interruptible {
            instance_priv
                .flush_interrupt_enabled
                .store(true, Ordering::Release);
        }
        cache.flush(completer.into_callback());
        let outcome = if interruptible {
            call.wait_interruptible(intr, |_| {})
        } else {
            WaitOutcome::Completed(call.wait())
        };
        instance_priv
            .flush_interrupt_enabled
            .store(false, Ordering::Release);
        match outcome {
            WaitOutcome::Completed(status) => engine_status("flush", status),
            WaitOutcome::Interrupted => {
                cache.flush_interrupt();
                Err(Error::interrupted("flush"))
            }
        }
    }

    /// Blocking flush of a single core, same interruption window as
    /// [`ManagerInner::flush_sync`].
    pub(crate) fn flush_core_sync(
        &self,
        cache: &CacheRef,
        core_id: velocache_core::CoreId,
        instance_priv: &InstancePriv,
        intr: &Interruptor,
    ) -> Result<()> {
        let (call, completer) = SyncCall::new();
        instance_priv
            .flush_interrupt_enabled
            .store(true, Ordering::Release);
        cache.flush_core(core_id, completer.into_callback());
        let outcome = call.wait_interruptible(intr, |_| {});
        instance_priv
            .flush_interrupt_enabled
            .store(false, Ordering::Release);
        match outcome {
            WaitOutcome::Completed(status) => engine_status("flush_core", status),
            WaitOutcome::Interrupted => {
                cache.flush_interrupt();
                Err(Error::interrupted("flush_core"))
            }
        }
    }

    /// Post-stop half of instance teardown, shared by every path that stops
    /// an instance (foreground or from a deferred worker).
    ///
    /// A stop that failed outright leaves the instance intact; only its lock
    /// is released. A stop that succeeded, or failed with `WriteCache` (the
    /// instance is gone, dirty data stayed behind), tears down everything the
    /// management layer attached to it.
    pub(crate) fn finish_teardown(&self, cache: &CacheRef, stop_status: EngineResult) {
        match stop_status {
            Err(err) if err != EngineError::WriteCache => {
                warn!(cache = %cache.name(), error = %err, "stop failed, instance kept");
                cache.unlock();
            }
            status => {
                if status == Err(EngineError::WriteCache) {
                    warn!(cache = %cache.name(), "stopped with dirty data left on the cache device");
                }
                self.classifier.detach(cache);
                if let Some(instance_priv) = self.remove_priv(cache.name().as_str()) {
                    if let Some(queues) = instance_priv.queues.lock().take() {
                        queues.stop();
                    }
                }
                cache.unlock();
            }
        }
    }

    /// Full rollback of a locked, partially brought-up instance: exported
    /// devices first, then the engine stop, then the management teardown.
    pub(crate) fn rollback_started(&self, cache: &CacheRef) {
        if let Err(err) = self.devices.destroy_all_exported(cache) {
            warn!(cache = %cache.name(), error = %err, "destroying exported devices failed during rollback");
        }
        let status = stack::stop_sync(cache);
        self.finish_teardown(cache, status);
    }
}

/// Entry point of the management layer.
///
/// Cloning is cheap and hands out another handle to the same orchestrator.
#[derive(Clone)]
pub struct CacheManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl CacheManager {
    pub fn new(
        engine: Arc<dyn Engine>,
        classifier: Arc<dyn Classifier>,
        devices: Arc<dyn DeviceFactory>,
    ) -> Self {
        CacheManager {
            inner: Arc::new(ManagerInner {
                engine,
                classifier,
                devices,
                privs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The engine this manager drives. Exposed for read-only inspection.
    pub fn engine(&self) -> Arc<dyn Engine> {
        Arc::clone(&self.inner.engine)
    }
}
