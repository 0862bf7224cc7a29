//! One-shot worker threads for deferred rollback.
//!
//! A management operation that can be abandoned mid-flight spawns its rollback
//! worker before issuing the engine call. The worker sits parked until someone
//! wakes it, then runs its closure once and exits. If the operation succeeds
//! the worker is told to stop without ever running.
//!
//! Spawning up front matters: once the caller has been interrupted it is gone,
//! and an allocation failure at that point would leave nobody to clean up.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use tracing::{debug, trace};
use velocache_core::{Error, Result};

enum Cmd {
    Wake,
    Stop,
}

/// Cloneable handle that can wake the worker after the owning
/// [`DeferredWorker`] has been detached.
#[derive(Clone)]
pub struct WorkerWaker {
    tx: Sender<Cmd>,
}

impl WorkerWaker {
    pub fn wake(&self) {
        // The worker may already have exited. Nothing to do then.
        let _ = self.tx.send(Cmd::Wake);
    }
}

/// A parked thread holding a deferred closure.
pub struct DeferredWorker {
    name: String,
    tx: Sender<Cmd>,
    handle: Option<JoinHandle<()>>,
}

impl DeferredWorker {
    /// Spawns the worker. `run` executes at most once, on the first wake.
    pub fn spawn<F>(name: &str, run: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = channel::bounded::<Cmd>(1);
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                match rx.recv() {
                    Ok(Cmd::Wake) => {
                        debug!(worker = %thread_name, "deferred worker running");
                        run();
                    }
                    Ok(Cmd::Stop) | Err(_) => {}
                }
                trace!(worker = %thread_name, "deferred worker exiting");
            })
            .map_err(|e| Error::system("spawn_worker", format!("{name}: {e}")))?;
        Ok(DeferredWorker {
            name: name.to_string(),
            tx,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle for waking the worker after [`DeferredWorker::detach`].
    pub fn waker(&self) -> WorkerWaker {
        WorkerWaker {
            tx: self.tx.clone(),
        }
    }

    /// Runs the deferred closure on the worker thread.
    pub fn wake(&self) {
        let _ = self.tx.send(Cmd::Wake);
    }

    /// Waits for the worker to exit. Call after `wake`, otherwise this blocks
    /// until someone else wakes or stops it.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Releases the thread without stopping it. It keeps waiting for a
    /// [`WorkerWaker::wake`] and cleans itself up after running. Grab a
    /// waker first; if every sender is gone the thread exits unrun.
    pub fn detach(mut self) {
        self.handle.take();
    }

    /// Tells the worker to exit without running and waits for it.
    pub fn stop(mut self) {
        let _ = self.tx.send(Cmd::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeferredWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Cmd::Stop);
            let _ = handle.join();
        }
    }
}
