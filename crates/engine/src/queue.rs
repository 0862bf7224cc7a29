//! Completion-dispatch queues.
//!
//! The engine never runs a completion inline: it pushes a job onto the
//! instance's management queue and kicks it. A worker thread owned by the
//! management layer drains the queue. The kicker is how the queue reaches
//! that worker without knowing anything about it.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// A unit of deferred work, usually a bound completion callback.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A named FIFO of jobs with a pluggable wake-up hook.
pub struct Queue {
    name: String,
    jobs: Mutex<VecDeque<Job>>,
    kicker: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Queue {
            name: name.into(),
            jobs: Mutex::new(VecDeque::new()),
            kicker: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the wake-up hook the servicing worker listens on.
    pub fn set_kicker(&self, kicker: impl Fn() + Send + Sync + 'static) {
        *self.kicker.lock() = Some(Box::new(kicker));
    }

    /// Enqueue a job and kick the servicing worker.
    pub fn push(&self, job: Job) {
        self.jobs.lock().push_back(job);
        if let Some(kick) = self.kicker.lock().as_ref() {
            kick();
        }
    }

    /// Take the oldest pending job, if any.
    pub fn pop(&self) -> Option<Job> {
        self.jobs.lock().pop_front()
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }
}
