//! The simulated cache instance.
//!
//! State transitions follow the engine contract: every asynchronous entry
//! point defers its state change and completion onto the instance's
//! management queue (or a detached thread when no queues are registered yet),
//! so completions never fire inline from the call. Fault and hold knobs let
//! tests pick the exact completion outcome and timing.

use crate::contract::{CacheInstance, Completion, CoreCompletion, CoreHandle, CoreRef};
use crate::queue::{Job, Queue};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;
use velocache_core::{
    CacheId, CacheMode, CacheName, CacheState, CleaningParam, CleaningPolicy, CoreConfig, CoreId,
    DeviceConfig, DeviceProperties, EngineError, EngineResult, SeqCutoffPolicy,
};

/// Shared operation-event log, owned by the simulator engine.
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

pub(crate) struct SimCore {
    id: CoreId,
    name: CacheName,
    path: String,
    dirty: AtomicU64,
    seq_cutoff: Mutex<(SeqCutoffPolicy, u32)>,
}

impl CoreHandle for SimCore {
    fn id(&self) -> CoreId {
        self.id
    }

    fn name(&self) -> &CacheName {
        &self.name
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn dirty_blocks(&self) -> u64 {
        self.dirty.load(Ordering::Relaxed)
    }

    fn seq_cutoff_policy(&self) -> SeqCutoffPolicy {
        self.seq_cutoff.lock().0
    }

    fn seq_cutoff_threshold(&self) -> u32 {
        self.seq_cutoff.lock().1
    }
}

struct LockWaiter {
    write: bool,
    completion: Completion,
}

#[derive(Default)]
struct LockState {
    writer: bool,
    readers: usize,
    waiters: VecDeque<LockWaiter>,
}

struct Inner {
    state: CacheState,
    attached: bool,
    mode: CacheMode,
    device: Option<DeviceConfig>,
    recorded_props: Option<DeviceProperties>,
    cores: Vec<Arc<SimCore>>,
    cleaning: CleaningPolicy,
    cleaning_params: HashMap<CleaningParam, u32>,
    seq_cutoff_threshold: u32,
    seq_cutoff_policy: SeqCutoffPolicy,
}

fn default_cleaning_params() -> HashMap<CleaningParam, u32> {
    HashMap::from([
        (CleaningParam::WakeUpTime, 20_000),
        (CleaningParam::StalenessTime, 120),
        (CleaningParam::FlushMaxBuffers, 100),
        (CleaningParam::ActivityThreshold, 10_000),
    ])
}

#[derive(Default)]
pub(crate) struct Links {
    pub lower: Weak<SimCache>,
    pub upper: Weak<SimCache>,
}

struct HeldOp {
    op: &'static str,
    completion: Completion,
    apply: Box<dyn FnOnce(&Arc<SimCache>) -> EngineResult + Send>,
}

#[derive(Default)]
struct Faults {
    fail: HashMap<&'static str, EngineError>,
    holds: HashSet<&'static str>,
    held: Vec<HeldOp>,
}

/// One simulated cache instance.
pub struct SimCache {
    name: CacheName,
    id: CacheId,
    self_ref: Weak<SimCache>,
    inner: Mutex<Inner>,
    lock_state: Mutex<LockState>,
    pub(crate) links: Mutex<Links>,
    queues: Mutex<Option<Arc<Queue>>>,
    dirty: AtomicU64,
    faults: Mutex<Faults>,
    events: EventLog,
    /// Unregisters this instance from the engine on stop
    unregister: Box<dyn Fn(&str) + Send + Sync>,
}

impl SimCache {
    pub(crate) fn new(
        name: CacheName,
        id: CacheId,
        mode: CacheMode,
        events: EventLog,
        unregister: Box<dyn Fn(&str) + Send + Sync>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| SimCache {
            name,
            id,
            self_ref: self_ref.clone(),
            inner: Mutex::new(Inner {
                state: CacheState::Running,
                attached: false,
                mode,
                device: None,
                recorded_props: None,
                cores: Vec::new(),
                cleaning: CleaningPolicy::Alru,
                cleaning_params: default_cleaning_params(),
                seq_cutoff_threshold: 1024 * 1024,
                seq_cutoff_policy: SeqCutoffPolicy::Full,
            }),
            // a started instance is returned to the caller already locked
            lock_state: Mutex::new(LockState {
                writer: true,
                ..LockState::default()
            }),
            links: Mutex::new(Links::default()),
            queues: Mutex::new(None),
            dirty: AtomicU64::new(0),
            faults: Mutex::new(Faults::default()),
            events,
            unregister,
        })
    }

    fn arc(&self) -> Arc<SimCache> {
        self.self_ref
            .upgrade()
            .expect("simulated instance outlived by its own operation")
    }

    fn record(&self, op: &str) {
        self.events.lock().push(format!("{op}:{}", self.name));
    }

    fn dispatch(&self, job: Job) {
        let queue = self.queues.lock().clone();
        match queue {
            Some(q) => q.push(job),
            // before queues exist, fall back to a detached thread; the
            // contract only requires "not inline"
            None => {
                std::thread::spawn(job);
            }
        }
    }

    /// Run `apply` and the completion asynchronously, honoring fault and
    /// hold knobs for `op`.
    fn finish(
        &self,
        op: &'static str,
        completion: Completion,
        apply: impl FnOnce(&Arc<SimCache>) -> EngineResult + Send + 'static,
    ) {
        let mut faults = self.faults.lock();
        if let Some(err) = faults.fail.remove(op) {
            drop(faults);
            trace!(cache = %self.name, op, %err, "sim: injected failure");
            self.dispatch(Box::new(move || completion(Err(err))));
            return;
        }
        if faults.holds.remove(op) {
            trace!(cache = %self.name, op, "sim: holding completion");
            faults.held.push(HeldOp {
                op,
                completion,
                apply: Box::new(apply),
            });
            return;
        }
        drop(faults);
        let this = self.arc();
        self.dispatch(Box::new(move || {
            let result = apply(&this);
            completion(result)
        }));
    }

    fn grant_waiters(&self, ls: &mut LockState) {
        while let Some(front) = ls.waiters.front() {
            if front.write {
                if ls.writer || ls.readers > 0 {
                    break;
                }
                let waiter = ls.waiters.pop_front().expect("front exists");
                ls.writer = true;
                self.record("lock");
                self.dispatch(Box::new(move || (waiter.completion)(Ok(()))));
            } else {
                if ls.writer {
                    break;
                }
                let waiter = ls.waiters.pop_front().expect("front exists");
                ls.readers += 1;
                self.record("read_lock");
                self.dispatch(Box::new(move || (waiter.completion)(Ok(()))));
            }
        }
    }

    // -- test knobs ---------------------------------------------------------

    /// Make the next `op` complete with `err` instead of running.
    pub fn fail_next(&self, op: &'static str, err: EngineError) {
        self.faults.lock().fail.insert(op, err);
    }

    /// Park the next `op` until [`SimCache::release`] or
    /// [`SimCache::abort_held`].
    pub fn hold_next(&self, op: &'static str) {
        self.faults.lock().holds.insert(op);
    }

    /// Let a held `op` run and complete normally.
    pub fn release(&self, op: &'static str) -> bool {
        let held = {
            let mut faults = self.faults.lock();
            match faults.held.iter().position(|h| h.op == op) {
                Some(idx) => faults.held.remove(idx),
                None => return false,
            }
        };
        let this = self.arc();
        self.dispatch(Box::new(move || {
            let result = (held.apply)(&this);
            (held.completion)(result)
        }));
        true
    }

    /// Complete a held `op` with `err`, without running it.
    pub fn abort_held(&self, op: &'static str, err: EngineError) -> bool {
        let held = {
            let mut faults = self.faults.lock();
            match faults.held.iter().position(|h| h.op == op) {
                Some(idx) => faults.held.remove(idx),
                None => return false,
            }
        };
        self.dispatch(Box::new(move || (held.completion)(Err(err))));
        true
    }

    /// Operations currently parked by [`SimCache::hold_next`].
    pub fn held_ops(&self) -> Vec<&'static str> {
        self.faults.lock().held.iter().map(|h| h.op).collect()
    }

    /// Simulate writes dirtying the cache.
    pub fn add_dirty(&self, blocks: u64) {
        self.dirty.fetch_add(blocks, Ordering::Relaxed);
    }

    /// Simulate writes dirtying one core. Returns false for an unknown id.
    pub fn add_core_dirty(&self, id: CoreId, blocks: u64) -> bool {
        match self.inner.lock().cores.iter().find(|c| c.id == id) {
            Some(core) => {
                core.dirty.fetch_add(blocks, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// (writer held, reader count, queued waiters), for lock accounting
    /// assertions.
    pub fn lock_counts(&self) -> (bool, usize, usize) {
        let ls = self.lock_state.lock();
        (ls.writer, ls.readers, ls.waiters.len())
    }
}

impl CacheInstance for SimCache {
    fn name(&self) -> &CacheName {
        &self.name
    }

    fn id(&self) -> CacheId {
        self.id
    }

    fn state(&self) -> CacheState {
        self.inner.lock().state
    }

    fn mode(&self) -> CacheMode {
        self.inner.lock().mode
    }

    fn set_mode(&self, mode: CacheMode) {
        self.inner.lock().mode = mode;
    }

    fn is_attached(&self) -> bool {
        self.inner.lock().attached
    }

    fn dirty_blocks(&self) -> u64 {
        self.dirty.load(Ordering::Relaxed)
    }

    fn device_path(&self) -> Option<String> {
        self.inner.lock().device.as_ref().map(|d| d.path.clone())
    }

    fn device_properties(&self) -> Option<DeviceProperties> {
        self.inner.lock().recorded_props
    }

    fn set_queues(&self, mngt: Arc<Queue>, _io: Vec<Arc<Queue>>) {
        *self.queues.lock() = Some(mngt);
    }

    fn lock(&self, completion: Completion) {
        let mut ls = self.lock_state.lock();
        if !ls.writer && ls.readers == 0 && ls.waiters.is_empty() {
            ls.writer = true;
            self.record("lock");
            self.dispatch(Box::new(move || completion(Ok(()))));
        } else {
            ls.waiters.push_back(LockWaiter {
                write: true,
                completion,
            });
        }
    }

    fn unlock(&self) {
        let mut ls = self.lock_state.lock();
        assert!(ls.writer, "unlock without a held management lock");
        ls.writer = false;
        self.record("unlock");
        self.grant_waiters(&mut ls);
    }

    fn read_lock(&self, completion: Completion) {
        let mut ls = self.lock_state.lock();
        // queued writers block new readers, or a steady stats stream could
        // starve management operations forever
        if !ls.writer && ls.waiters.is_empty() {
            ls.readers += 1;
            self.record("read_lock");
            self.dispatch(Box::new(move || completion(Ok(()))));
        } else {
            ls.waiters.push_back(LockWaiter {
                write: false,
                completion,
            });
        }
    }

    fn read_unlock(&self) {
        let mut ls = self.lock_state.lock();
        assert!(ls.readers > 0, "read_unlock without a held read lock");
        ls.readers -= 1;
        self.record("read_unlock");
        self.grant_waiters(&mut ls);
    }

    fn attach(&self, cfg: &DeviceConfig, completion: Completion) {
        let cfg = cfg.clone();
        self.finish("attach", completion, move |this| {
            let mut inner = this.inner.lock();
            if inner.attached {
                return Err(EngineError::InvalidState);
            }
            inner.attached = true;
            inner.recorded_props = Some(cfg.properties);
            inner.device = Some(cfg);
            Ok(())
        });
    }

    fn load(&self, cfg: &DeviceConfig, completion: Completion) {
        let cfg = cfg.clone();
        self.finish("load", completion, move |this| {
            let mut inner = this.inner.lock();
            if inner.attached {
                return Err(EngineError::InvalidState);
            }
            inner.attached = true;
            inner.recorded_props = Some(cfg.properties);
            inner.device = Some(cfg);
            Ok(())
        });
    }

    fn standby_attach(&self, cfg: &DeviceConfig, completion: Completion) {
        let cfg = cfg.clone();
        self.finish("standby_attach", completion, move |this| {
            let mut inner = this.inner.lock();
            if inner.attached {
                return Err(EngineError::InvalidState);
            }
            inner.state = CacheState::Standby;
            inner.attached = true;
            inner.recorded_props = Some(cfg.properties);
            inner.device = Some(cfg);
            Ok(())
        });
    }

    fn standby_load(&self, cfg: &DeviceConfig, completion: Completion) {
        let cfg = cfg.clone();
        self.finish("standby_load", completion, move |this| {
            let mut inner = this.inner.lock();
            if inner.attached {
                return Err(EngineError::InvalidState);
            }
            inner.state = CacheState::Standby;
            inner.attached = true;
            inner.recorded_props = Some(cfg.properties);
            inner.device = Some(cfg);
            Ok(())
        });
    }

    fn standby_detach(&self, completion: Completion) {
        self.finish("standby_detach", completion, move |this| {
            let mut inner = this.inner.lock();
            if inner.state != CacheState::Standby {
                return Err(EngineError::NotStandby);
            }
            inner.attached = false;
            inner.device = None;
            Ok(())
        });
    }

    fn standby_activate(&self, cfg: &DeviceConfig, completion: Completion) {
        let cfg = cfg.clone();
        self.finish("standby_activate", completion, move |this| {
            let mut inner = this.inner.lock();
            if inner.state != CacheState::Standby {
                return Err(EngineError::NotStandby);
            }
            inner.state = CacheState::Running;
            inner.attached = true;
            inner.recorded_props = Some(cfg.properties);
            inner.device = Some(cfg);
            Ok(())
        });
    }

    fn stop(&self, completion: Completion) {
        // stop consults the fault map inside apply: a WriteCache failure
        // still tears the instance down, matching the engine contract
        let injected = self.faults.lock().fail.remove("stop");
        let held = {
            let mut faults = self.faults.lock();
            faults.holds.remove("stop")
        };
        let run = move |this: &Arc<SimCache>| -> EngineResult {
            match injected {
                Some(err) if err != EngineError::WriteCache => Err(err),
                other => {
                    {
                        let mut inner = this.inner.lock();
                        inner.state = CacheState::Stopping;
                        inner.attached = false;
                    }
                    {
                        let mut links = this.links.lock();
                        if let Some(lower) = links.lower.upgrade() {
                            lower.links.lock().upper = Weak::new();
                        }
                        if let Some(upper) = links.upper.upgrade() {
                            upper.links.lock().lower = Weak::new();
                        }
                        *links = Links::default();
                    }
                    this.record("stop");
                    (this.unregister)(this.name.as_str());
                    match other {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
            }
        };
        if held {
            self.faults.lock().held.push(HeldOp {
                op: "stop",
                completion,
                apply: Box::new(run),
            });
            return;
        }
        let this = self.arc();
        self.dispatch(Box::new(move || {
            let result = run(&this);
            completion(result)
        }));
    }

    fn save(&self, completion: Completion) {
        self.finish("save", completion, |_this| Ok(()));
    }

    fn flush(&self, completion: Completion) {
        self.finish("flush", completion, |this| {
            this.dirty.store(0, Ordering::Relaxed);
            for core in &this.inner.lock().cores {
                core.dirty.store(0, Ordering::Relaxed);
            }
            this.record("flush");
            Ok(())
        });
    }

    fn flush_interrupt(&self) {
        self.abort_held("flush", EngineError::FlushingInterrupted);
    }

    fn purge(&self, completion: Completion) {
        self.finish("purge", completion, |this| {
            this.dirty.store(0, Ordering::Relaxed);
            this.record("purge");
            Ok(())
        });
    }

    fn cores(&self) -> Vec<CoreRef> {
        self.inner
            .lock()
            .cores
            .iter()
            .map(|c| Arc::clone(c) as CoreRef)
            .collect()
    }

    fn core_count(&self) -> usize {
        self.inner.lock().cores.len()
    }

    fn add_core(&self, cfg: &CoreConfig, completion: CoreCompletion) {
        if let Some(err) = self.faults.lock().fail.remove("add_core") {
            self.dispatch(Box::new(move || completion(Err(err))));
            return;
        }
        let cfg = cfg.clone();
        let this = self.arc();
        self.dispatch(Box::new(move || {
            let mut inner = this.inner.lock();
            if inner.cores.iter().any(|c| c.path == cfg.path) {
                drop(inner);
                completion(Err(EngineError::DeviceBusy));
                return;
            }
            let id = match cfg.core_id {
                Some(id) => {
                    if inner.cores.iter().any(|c| c.id == id) {
                        drop(inner);
                        completion(Err(EngineError::Exists));
                        return;
                    }
                    id
                }
                None => {
                    let next = (0..).find(|n| {
                        inner
                            .cores
                            .iter()
                            .all(|c| c.id.get() != *n)
                    });
                    CoreId::new(next.expect("core id space exhausted")).expect("in range")
                }
            };
            let core = Arc::new(SimCore {
                id,
                name: cfg.name.clone(),
                path: cfg.path.clone(),
                dirty: AtomicU64::new(0),
                // new cores inherit the instance-wide cutoff
                seq_cutoff: Mutex::new((inner.seq_cutoff_policy, inner.seq_cutoff_threshold)),
            });
            inner.cores.push(Arc::clone(&core));
            drop(inner);
            this.record("add_core");
            completion(Ok(core as CoreRef));
        }));
    }

    fn remove_core(&self, id: CoreId, completion: Completion) {
        self.finish("remove_core", completion, move |this| {
            let mut inner = this.inner.lock();
            match inner.cores.iter().position(|c| c.id == id) {
                Some(idx) => {
                    inner.cores.remove(idx);
                    Ok(())
                }
                None => Err(EngineError::NotExist),
            }
        });
    }

    fn detach_core(&self, id: CoreId, completion: Completion) {
        self.finish("detach_core", completion, move |this| {
            let inner = this.inner.lock();
            if inner.cores.iter().any(|c| c.id == id) {
                Ok(())
            } else {
                Err(EngineError::NotExist)
            }
        });
    }

    fn flush_core(&self, id: CoreId, completion: Completion) {
        self.finish("flush_core", completion, move |this| {
            let inner = this.inner.lock();
            match inner.cores.iter().find(|c| c.id == id) {
                Some(core) => {
                    core.dirty.store(0, Ordering::Relaxed);
                    Ok(())
                }
                None => Err(EngineError::NotExist),
            }
        });
    }

    fn purge_core(&self, id: CoreId, completion: Completion) {
        self.finish("purge_core", completion, move |this| {
            let inner = this.inner.lock();
            match inner.cores.iter().find(|c| c.id == id) {
                Some(core) => {
                    core.dirty.store(0, Ordering::Relaxed);
                    Ok(())
                }
                None => Err(EngineError::NotExist),
            }
        });
    }

    fn cleaning_policy(&self) -> CleaningPolicy {
        self.inner.lock().cleaning
    }

    fn set_cleaning_policy(&self, policy: CleaningPolicy) {
        self.inner.lock().cleaning = policy;
    }

    fn cleaning_param(&self, param: CleaningParam) -> u32 {
        self.inner.lock().cleaning_params.get(&param).copied().unwrap_or(0)
    }

    fn set_cleaning_param(&self, param: CleaningParam, value: u32) {
        self.inner.lock().cleaning_params.insert(param, value);
    }

    fn seq_cutoff_threshold(&self) -> u32 {
        self.inner.lock().seq_cutoff_threshold
    }

    fn set_seq_cutoff_threshold(&self, bytes: u32) {
        let mut inner = self.inner.lock();
        // the instance-wide default cascades to every registered core
        for core in &inner.cores {
            core.seq_cutoff.lock().1 = bytes;
        }
        inner.seq_cutoff_threshold = bytes;
    }

    fn seq_cutoff_policy(&self) -> SeqCutoffPolicy {
        self.inner.lock().seq_cutoff_policy
    }

    fn set_seq_cutoff_policy(&self, policy: SeqCutoffPolicy) {
        let mut inner = self.inner.lock();
        for core in &inner.cores {
            core.seq_cutoff.lock().0 = policy;
        }
        inner.seq_cutoff_policy = policy;
    }

    fn set_core_seq_cutoff(
        &self,
        id: CoreId,
        policy: SeqCutoffPolicy,
        threshold: u32,
    ) -> EngineResult {
        let inner = self.inner.lock();
        match inner.cores.iter().find(|c| c.id == id) {
            Some(core) => {
                *core.seq_cutoff.lock() = (policy, threshold);
                Ok(())
            }
            None => Err(EngineError::NotExist),
        }
    }

    fn reset_stats(&self) {
        self.record("reset_stats");
    }
}
