//! Worker threads behind an instance's engine queues.
//!
//! The engine never runs completions inline. It parks them on its queues and
//! kicks a callback; these workers own the draining. Each instance gets one
//! management queue plus a configurable number of I/O queues, each drained by
//! a dedicated named thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};
use velocache_core::{Error, Result};
use velocache_engine::Queue;

struct WorkerSignal {
    stop: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

struct QueueWorker {
    signal: Arc<WorkerSignal>,
    handle: Option<JoinHandle<()>>,
}

/// The queues and drain threads belonging to one cache instance.
pub struct QueueSet {
    mngt: Arc<Queue>,
    io: Vec<Arc<Queue>>,
    workers: Vec<QueueWorker>,
}

impl QueueSet {
    /// Spawns one management worker and `io_count` I/O workers for the named
    /// instance.
    pub fn start(cache_name: &str, io_count: usize) -> Result<QueueSet> {
        let mut workers = Vec::with_capacity(io_count + 1);

        let mngt = Queue::new(format!("vc_mngt_{cache_name}"));
        workers.push(spawn_worker(Arc::clone(&mngt))?);

        let mut io = Vec::with_capacity(io_count);
        for i in 0..io_count {
            let queue = Queue::new(format!("vc_io_{cache_name}_{i}"));
            workers.push(spawn_worker(Arc::clone(&queue))?);
            io.push(queue);
        }

        debug!(cache = cache_name, io_count, "queue workers started");
        Ok(QueueSet { mngt, io, workers })
    }

    pub fn mngt_queue(&self) -> Arc<Queue> {
        Arc::clone(&self.mngt)
    }

    pub fn io_queues(&self) -> Vec<Arc<Queue>> {
        self.io.clone()
    }

    /// Stops every worker and joins it. Jobs already queued are drained
    /// before the workers exit.
    pub fn stop(mut self) {
        for worker in &self.workers {
            worker.signal.stop.store(true, Ordering::Release);
            let _guard = worker.signal.lock.lock();
            worker.signal.cond.notify_one();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn spawn_worker(queue: Arc<Queue>) -> Result<QueueWorker> {
    let signal = Arc::new(WorkerSignal {
        stop: AtomicBool::new(false),
        lock: Mutex::new(()),
        cond: Condvar::new(),
    });

    {
        let signal = Arc::clone(&signal);
        queue.set_kicker(move || {
            let _guard = signal.lock.lock();
            signal.cond.notify_one();
        });
    }

    let name = queue.name().to_string();
    let spawn_name = name.clone();
    let thread_signal = Arc::clone(&signal);
    let handle = thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            loop {
                while let Some(job) = queue.pop() {
                    job();
                }
                // Pending count is re-checked under the lock so a push that
                // kicked between pop and lock is not slept through.
                let mut guard = thread_signal.lock.lock();
                if queue.pending() > 0 {
                    continue;
                }
                if thread_signal.stop.load(Ordering::Acquire) {
                    break;
                }
                thread_signal.cond.wait(&mut guard);
            }
            trace!(queue = %name, "queue worker exiting");
        })
        .map_err(|e| Error::system("spawn_queue_worker", format!("{spawn_name}: {e}")))?;

    Ok(QueueWorker {
        signal,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn jobs_run_on_worker_threads() {
        let set = QueueSet::start("qtest", 2).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for queue in set.io_queues() {
            let counter = Arc::clone(&ran);
            queue.push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let counter = Arc::clone(&ran);
        set.mngt_queue().push(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while ran.load(Ordering::SeqCst) < 3 {
            assert!(std::time::Instant::now() < deadline, "jobs did not run");
            thread::sleep(Duration::from_millis(1));
        }
        set.stop();
    }

    #[test]
    fn stop_drains_pending_jobs() {
        let set = QueueSet::start("qdrain", 0).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..16 {
            let counter = Arc::clone(&ran);
            set.mngt_queue().push(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        set.stop();
        assert_eq!(ran.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn worker_threads_carry_queue_names() {
        let set = QueueSet::start("named", 1).unwrap();
        let seen = Arc::new(Mutex::new(String::new()));
        let slot = Arc::clone(&seen);
        set.mngt_queue().push(Box::new(move || {
            if let Some(name) = thread::current().name() {
                *slot.lock() = name.to_string();
            }
        }));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while seen.lock().is_empty() {
            assert!(std::time::Instant::now() < deadline, "job did not run");
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(*seen.lock(), "vc_mngt_named");
        set.stop();
    }
}
