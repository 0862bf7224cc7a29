//! Deterministic in-process simulator of the engine contract.
//!
//! Used by the integration tests and the demo CLI. The simulator keeps the
//! registry, lock queues, dirty counters and stack links honest while
//! skipping everything the real engine owns (cache lines, metadata,
//! policies). Fault and hold knobs on [`SimCache`] control completion
//! outcomes and timing.

mod instance;
mod support;

pub use instance::SimCache;
pub use support::{SimClassifier, SimDeviceFactory};

use crate::contract::{CacheInstance, CacheRef, Completion, Engine};
use dashmap::DashMap;
use instance::EventLog;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;
use velocache_core::{CacheConfig, CacheId, CacheState, EngineError, EngineResult};

struct StagedFault {
    cache: String,
    op: &'static str,
    /// `None` holds the operation instead of failing it
    err: Option<EngineError>,
}

/// The simulated caching engine.
pub struct SimEngine {
    caches: Arc<DashMap<String, Arc<SimCache>>>,
    events: EventLog,
    staged: Mutex<Vec<StagedFault>>,
    fail_next_ml: Mutex<Option<EngineError>>,
}

impl Default for SimEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimEngine {
    pub fn new() -> Self {
        SimEngine {
            caches: Arc::new(DashMap::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            staged: Mutex::new(Vec::new()),
            fail_next_ml: Mutex::new(None),
        }
    }

    /// Make the next stack (ml) operation complete with `err`.
    pub fn fail_next_ml(&self, err: EngineError) {
        *self.fail_next_ml.lock() = Some(err);
    }

    /// Arrange for `op` on a not-yet-started instance to fail with `err`.
    /// Applied when the instance registers, so tests can target the first
    /// operation inside a start sequence.
    pub fn stage_fail(&self, cache: &str, op: &'static str, err: EngineError) {
        self.staged.lock().push(StagedFault {
            cache: cache.to_string(),
            op,
            err: Some(err),
        });
    }

    /// Arrange for `op` on a not-yet-started instance to be held.
    pub fn stage_hold(&self, cache: &str, op: &'static str) {
        self.staged.lock().push(StagedFault {
            cache: cache.to_string(),
            op,
            err: None,
        });
    }

    /// Direct handle to a simulated instance, for fault injection and lock
    /// accounting assertions in tests.
    pub fn sim_cache(&self, name: &str) -> Option<Arc<SimCache>> {
        self.caches.get(name).map(|e| Arc::clone(e.value()))
    }

    /// The operation-event log (lock grants, releases, stops), in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    fn lowest_free_id(&self) -> Option<CacheId> {
        let taken: Vec<u16> = self
            .caches
            .iter()
            .map(|e| e.value().id().get())
            .collect();
        (1..=velocache_core::MAX_CACHE_ID)
            .find(|id| !taken.contains(id))
            .map(|id| CacheId::new(id).expect("in range"))
    }

    fn lookup(&self, cache: &CacheRef) -> Option<Arc<SimCache>> {
        self.sim_cache(cache.name().as_str())
    }

    fn complete_detached(completion: Completion, result: EngineResult) {
        std::thread::spawn(move || completion(result));
    }
}

impl Engine for SimEngine {
    fn get_by_name(&self, name: &str) -> Result<CacheRef, EngineError> {
        self.caches
            .get(name)
            .map(|e| Arc::clone(e.value()) as CacheRef)
            .ok_or(EngineError::NotExist)
    }

    fn get_by_id(&self, id: CacheId) -> Result<CacheRef, EngineError> {
        self.caches
            .iter()
            .find(|e| e.value().id() == id)
            .map(|e| Arc::clone(e.value()) as CacheRef)
            .ok_or(EngineError::NotExist)
    }

    fn cache_count(&self) -> usize {
        self.caches.len()
    }

    fn visit(&self, f: &mut dyn FnMut(&CacheRef)) {
        let mut all: Vec<Arc<SimCache>> =
            self.caches.iter().map(|e| Arc::clone(e.value())).collect();
        all.sort_by_key(|c| c.id());
        for cache in all {
            let cache: CacheRef = cache;
            f(&cache);
        }
    }

    fn start(&self, cfg: &CacheConfig) -> Result<CacheRef, EngineError> {
        if self.caches.contains_key(cfg.name.as_str()) {
            return Err(EngineError::Exists);
        }
        let id = match cfg.id {
            Some(id) => {
                if self.caches.iter().any(|e| e.value().id() == id) {
                    return Err(EngineError::Exists);
                }
                id
            }
            None => self.lowest_free_id().ok_or(EngineError::NoMem)?,
        };
        let registry = Arc::downgrade(&self.caches);
        let cache = SimCache::new(
            cfg.name.clone(),
            id,
            cfg.mode,
            Arc::clone(&self.events),
            Box::new(move |name: &str| {
                if let Some(registry) = Weak::upgrade(&registry) {
                    registry.remove(name);
                }
            }),
        );
        {
            let mut staged = self.staged.lock();
            let mut rest = Vec::new();
            for fault in staged.drain(..) {
                if fault.cache == cfg.name.as_str() {
                    match fault.err {
                        Some(err) => cache.fail_next(fault.op, err),
                        None => cache.hold_next(fault.op),
                    }
                } else {
                    rest.push(fault);
                }
            }
            *staged = rest;
        }
        self.caches
            .insert(cfg.name.as_str().to_string(), Arc::clone(&cache));
        debug!(cache = %cfg.name, %id, "sim: instance started");
        Ok(cache as CacheRef)
    }

    fn ml_add_cache(&self, lower: &CacheRef, upper: &CacheRef, completion: Completion) {
        if let Some(err) = self.fail_next_ml.lock().take() {
            return Self::complete_detached(completion, Err(err));
        }
        let (lower, upper) = match (self.lookup(lower), self.lookup(upper)) {
            (Some(l), Some(u)) => (l, u),
            _ => return Self::complete_detached(completion, Err(EngineError::NotExist)),
        };
        if lower.state() != CacheState::Running || upper.state() != CacheState::Running {
            return Self::complete_detached(completion, Err(EngineError::InvalidState));
        }
        if upper.links.lock().lower.upgrade().is_some()
            || lower.links.lock().upper.upgrade().is_some()
        {
            return Self::complete_detached(completion, Err(EngineError::InvalidState));
        }
        lower.links.lock().upper = Arc::downgrade(&upper);
        upper.links.lock().lower = Arc::downgrade(&lower);
        debug!(lower = %lower.name(), upper = %upper.name(), "sim: stack joined");
        Self::complete_detached(completion, Ok(()));
    }

    fn ml_remove_cache(&self, member: &CacheRef, completion: Completion) {
        if let Some(err) = self.fail_next_ml.lock().take() {
            return Self::complete_detached(completion, Err(err));
        }
        let member = match self.lookup(member) {
            Some(m) => m,
            None => return Self::complete_detached(completion, Err(EngineError::NotExist)),
        };
        let stack = self.ml_collect(&(member as CacheRef));
        if stack.len() < 2 {
            return Self::complete_detached(completion, Err(EngineError::InvalidState));
        }
        let top = self
            .lookup(stack.last().expect("len checked"))
            .expect("member of live stack");
        let below = self
            .lookup(&stack[stack.len() - 2])
            .expect("member of live stack");
        top.links.lock().lower = Weak::new();
        below.links.lock().upper = Weak::new();
        debug!(removed = %top.name(), "sim: top detached from stack");
        Self::complete_detached(completion, Ok(()));
    }

    fn ml_collect(&self, member: &CacheRef) -> Vec<CacheRef> {
        let member = match self.lookup(member) {
            Some(m) => m,
            None => return Vec::new(),
        };
        let mut bottom = member;
        loop {
            let lower = bottom.links.lock().lower.upgrade();
            match lower {
                Some(l) => bottom = l,
                None => break,
            }
        }
        let mut out: Vec<CacheRef> = vec![Arc::clone(&bottom) as CacheRef];
        let mut cursor = bottom;
        loop {
            let upper = cursor.links.lock().upper.upgrade();
            match upper {
                Some(u) => {
                    out.push(Arc::clone(&u) as CacheRef);
                    cursor = u;
                }
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use velocache_core::{CacheMode, CacheName};

    fn cfg(name: &str) -> CacheConfig {
        CacheConfig {
            name: CacheName::new(name).unwrap(),
            id: None,
            mode: CacheMode::WriteThrough,
            line_size: 4096,
            queue_count: 1,
        }
    }

    #[test]
    fn start_assigns_lowest_free_id() {
        let engine = SimEngine::new();
        let a = engine.start(&cfg("a")).unwrap();
        let b = engine.start(&cfg("b")).unwrap();
        assert_eq!(a.id().get(), 1);
        assert_eq!(b.id().get(), 2);
        assert_eq!(engine.cache_count(), 2);
        assert!(matches!(engine.start(&cfg("a")), Err(EngineError::Exists)));
    }

    #[test]
    fn started_instance_is_locked() {
        let engine = SimEngine::new();
        engine.start(&cfg("a")).unwrap();
        let sim = engine.sim_cache("a").unwrap();
        let (writer, readers, waiters) = sim.lock_counts();
        assert!(writer);
        assert_eq!((readers, waiters), (0, 0));
    }

    #[test]
    fn ml_collect_orders_bottom_to_top() {
        let engine = SimEngine::new();
        let bottom = engine.start(&cfg("bottom")).unwrap();
        let top = engine.start(&cfg("top")).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        engine.ml_add_cache(&bottom, &top, Box::new(move |r| tx.send(r).unwrap()));
        rx.recv().unwrap().unwrap();

        let stack = engine.ml_collect(&top);
        let names: Vec<&str> = stack.iter().map(|c| c.name().as_str()).collect();
        assert_eq!(names, vec!["bottom", "top"]);
        // same snapshot wherever the walk starts
        let stack = engine.ml_collect(&bottom);
        let names: Vec<&str> = stack.iter().map(|c| c.name().as_str()).collect();
        assert_eq!(names, vec!["bottom", "top"]);
    }

    #[test]
    fn ml_remove_detaches_the_top_only() {
        let engine = SimEngine::new();
        let bottom = engine.start(&cfg("bottom")).unwrap();
        let top = engine.start(&cfg("top")).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        engine.ml_add_cache(&bottom, &top, Box::new(move |r| tx.send(r).unwrap()));
        rx.recv().unwrap().unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        engine.ml_remove_cache(&bottom, Box::new(move |r| tx.send(r).unwrap()));
        rx.recv().unwrap().unwrap();

        assert_eq!(engine.ml_collect(&bottom).len(), 1);
        assert_eq!(engine.ml_collect(&top).len(), 1);
        // both still exist as standalone instances
        assert_eq!(engine.cache_count(), 2);
    }
}
