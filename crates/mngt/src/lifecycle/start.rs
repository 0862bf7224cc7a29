//! Instance creation: start, attach or load, finalize.

use std::sync::Arc;

use tracing::{debug, info};
use velocache_core::{engine_status, EngineError, Error, InitMode, Result, StartRequest};
use velocache_engine::CacheRef;

use crate::manager::{CacheManager, InstancePriv};
use crate::queues::QueueSet;
use crate::stack;
use crate::sync::{Interruptor, SyncCall, WaitOutcome};
use crate::worker::DeferredWorker;

impl CacheManager {
    /// Starts a new cache instance: reserve the name, start it in the engine
    /// (locked), bring up queues, attach or load the cache device, finalize.
    ///
    /// Failures before the first engine call roll back inline. Once the
    /// device operation is in flight the unwind is the engine's own stop
    /// sequence, run from a pre-spawned rollback worker so it also covers the
    /// caller walking away mid-wait.
    pub fn start_instance(&self, req: &StartRequest, intr: &Interruptor) -> Result<()> {
        req.validate()?;
        let name = req.cache.name.as_str().to_string();
        if self.inner.engine.get_by_name(&name).is_ok() {
            return Err(Error::AlreadyExists { name });
        }

        debug!(cache = %name, init = ?req.init, "starting cache instance");
        let cache = self.inner.engine.start(&req.cache).map_err(|e| match e {
            EngineError::Exists => Error::AlreadyExists { name: name.clone() },
            other => Error::engine("start", other),
        })?;

        // Queues must exist before the first asynchronous call; without them
        // the engine has nowhere to dispatch completions.
        let queues = match QueueSet::start(&name, req.cache.queue_count) {
            Ok(queues) => queues,
            Err(err) => {
                let status = stack::stop_sync(&cache);
                self.inner.finish_teardown(&cache, status);
                return Err(err);
            }
        };
        cache.set_queues(queues.mngt_queue(), queues.io_queues());
        self.inner.insert_priv(&name, InstancePriv::new(queues));

        // Rollback worker, spawned while spawning can still fail cleanly.
        let worker = {
            let inner = Arc::clone(&self.inner);
            let target = Arc::clone(&cache);
            match DeferredWorker::spawn(&format!("vc_rb_{name}"), move || {
                inner.rollback_started(&target);
            }) {
                Ok(worker) => worker,
                Err(err) => {
                    self.inner.rollback_started(&cache);
                    return Err(err);
                }
            }
        };

        let op = match req.init {
            InitMode::New => "attach",
            InitMode::Load => "load",
            InitMode::Standby => "standby_attach",
            InitMode::StandbyLoad => "standby_load",
        };
        let (call, completer) = SyncCall::new();
        match req.init {
            InitMode::New => cache.attach(&req.device, completer.into_callback()),
            InitMode::Load => cache.load(&req.device, completer.into_callback()),
            InitMode::Standby => cache.standby_attach(&req.device, completer.into_callback()),
            InitMode::StandbyLoad => cache.standby_load(&req.device, completer.into_callback()),
        }

        let waker = worker.waker();
        match call.wait_interruptible(intr, move |_status| {
            // The caller never saw this instance; whatever the device
            // operation reported, it must not linger.
            waker.wake();
        }) {
            WaitOutcome::Interrupted => {
                worker.detach();
                return Err(Error::interrupted("start"));
            }
            WaitOutcome::Completed(Err(err)) => {
                worker.wake();
                worker.join();
                return Err(Error::engine(op, err));
            }
            WaitOutcome::Completed(Ok(())) => {}
        }

        if let Err(err) = self.finalize_started(&cache, req) {
            worker.wake();
            worker.join();
            return Err(err);
        }
        worker.stop();
        cache.unlock();
        info!(cache = %name, id = %cache.id(), "cache instance started");
        Ok(())
    }

    /// Post-attach finalization: classification, exported devices for any
    /// cores the load restored, and the optional stack join. Standby
    /// instances skip all of it.
    fn finalize_started(&self, cache: &CacheRef, req: &StartRequest) -> Result<()> {
        if req.init.is_standby() {
            return Ok(());
        }
        self.inner.classifier.attach(cache)?;
        for core in cache.cores() {
            self.inner.devices.create_exported(cache, &core)?;
        }
        if let Some(lower_name) = &req.lower {
            let lower = self.inner.get(lower_name.as_str())?;
            let (call, completer) = SyncCall::new();
            self.inner
                .engine
                .ml_add_cache(&lower, cache, completer.into_callback());
            engine_status("ml_add_cache", call.wait())?;
            debug!(cache = %req.cache.name, lower = %lower_name, "joined cache stack");
        }
        Ok(())
    }
}
