//! Parameter, info and flush operations.
//!
//! None of these need rollback orchestration; they take a lock or read lock,
//! act, persist when the change touches metadata, and release.

use tracing::{debug, info};
use velocache_core::{
    engine_status, CacheMode, CleaningParam, CleaningPolicy, CoreId, InstanceInfo, Result,
    SeqCutoffPolicy,
};
use velocache_engine::{CacheRef, ClassRule};

use crate::manager::CacheManager;
use crate::stack;
use crate::sync::{Interruptor, SyncCall};

fn info_of(cache: &CacheRef) -> InstanceInfo {
    InstanceInfo {
        name: cache.name().clone(),
        id: cache.id(),
        state: cache.state(),
        attached: cache.is_attached(),
        mode: cache.mode(),
        dirty_blocks: cache.dirty_blocks(),
        core_count: cache.core_count(),
    }
}

impl CacheManager {
    /// Snapshot of every known instance, ordered by id.
    pub fn list_instances(&self) -> Vec<InstanceInfo> {
        let mut out = Vec::with_capacity(self.inner.engine.cache_count());
        self.inner.engine.visit(&mut |cache| out.push(info_of(cache)));
        out
    }

    /// Snapshot of one instance, taken under its read lock.
    pub fn instance_info(&self, name: &str, intr: &Interruptor) -> Result<InstanceInfo> {
        let cache = self.inner.get(name)?;
        stack::read_lock_sync(&cache, intr)?;
        let info = info_of(&cache);
        cache.read_unlock();
        Ok(info)
    }

    pub fn cleaning_policy(&self, name: &str) -> Result<CleaningPolicy> {
        Ok(self.inner.get(name)?.cleaning_policy())
    }

    /// Sets the cleaning policy and persists it to the cache device.
    pub fn set_cleaning_policy(
        &self,
        name: &str,
        policy: CleaningPolicy,
        intr: &Interruptor,
    ) -> Result<()> {
        self.with_saved_change(name, intr, |cache| {
            cache.set_cleaning_policy(policy);
            debug!(cache = name, %policy, "cleaning policy changed");
        })
    }

    pub fn seq_cutoff(&self, name: &str) -> Result<(SeqCutoffPolicy, u32)> {
        let cache = self.inner.get(name)?;
        Ok((cache.seq_cutoff_policy(), cache.seq_cutoff_threshold()))
    }

    /// Sets the sequential-cutoff policy and threshold, persisted together.
    /// With a core id the change targets that core alone; without one it
    /// becomes the instance-wide setting, cascading to every core.
    pub fn set_seq_cutoff(
        &self,
        name: &str,
        core: Option<CoreId>,
        policy: SeqCutoffPolicy,
        threshold: u32,
        intr: &Interruptor,
    ) -> Result<()> {
        match core {
            Some(id) => {
                let cache = self.inner.get(name)?;
                stack::lock_sync(&cache, intr)?;
                let applied =
                    engine_status("seq_cutoff", cache.set_core_seq_cutoff(id, policy, threshold));
                let saved = match &applied {
                    Ok(()) if cache.is_attached() => stack::save_sync(&cache),
                    _ => Ok(()),
                };
                cache.unlock();
                applied?;
                saved?;
                debug!(cache = name, core = %id, %policy, threshold, "sequential cutoff changed");
                Ok(())
            }
            None => self.with_saved_change(name, intr, |cache| {
                cache.set_seq_cutoff_policy(policy);
                cache.set_seq_cutoff_threshold(threshold);
                debug!(cache = name, %policy, threshold, "sequential cutoff changed");
            }),
        }
    }

    pub fn cleaning_param(&self, name: &str, param: CleaningParam) -> Result<u32> {
        Ok(self.inner.get(name)?.cleaning_param(param))
    }

    /// Tunes one parameter of the active cleaning policy and persists it.
    pub fn set_cleaning_param(
        &self,
        name: &str,
        param: CleaningParam,
        value: u32,
        intr: &Interruptor,
    ) -> Result<()> {
        self.with_saved_change(name, intr, |cache| {
            cache.set_cleaning_param(param, value);
            debug!(cache = name, %param, value, "cleaning parameter changed");
        })
    }

    /// Switches the caching mode. Leaving write-back flushes first so no
    /// dirty data is stranded under a mode that will not write it back.
    pub fn set_cache_mode(&self, name: &str, mode: CacheMode, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        let instance_priv = self.inner.priv_of(name)?;
        stack::lock_sync(&cache, intr)?;
        if cache.mode() == CacheMode::WriteBack && mode != CacheMode::WriteBack {
            if let Err(err) = self.inner.flush_sync(&cache, &instance_priv, true, intr) {
                cache.unlock();
                return Err(err);
            }
        }
        let old_mode = cache.mode();
        cache.set_mode(mode);
        let saved = if cache.is_attached() {
            stack::save_sync(&cache)
        } else {
            Ok(())
        };
        if saved.is_err() {
            // Metadata still records the old mode; keep the runtime in
            // agreement with it.
            cache.set_mode(old_mode);
        }
        cache.unlock();
        saved?;
        info!(cache = name, %mode, "cache mode changed");
        Ok(())
    }

    /// Replaces the instance's I/O classification rules and persists them.
    pub fn set_class_rules(
        &self,
        name: &str,
        rules: &[ClassRule],
        intr: &Interruptor,
    ) -> Result<()> {
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;
        let applied = self.inner.classifier.apply_rules(&cache, rules);
        let saved = match &applied {
            Ok(()) if cache.is_attached() => stack::save_sync(&cache),
            _ => Ok(()),
        };
        cache.unlock();
        applied?;
        saved?;
        info!(cache = name, rules = rules.len(), "classification rules replaced");
        Ok(())
    }

    pub fn reset_stats(&self, name: &str, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        stack::read_lock_sync(&cache, intr)?;
        cache.reset_stats();
        cache.read_unlock();
        Ok(())
    }

    /// Interruptible flush of the whole instance, under the read lock so
    /// management transitions stay out while I/O keeps flowing.
    pub fn flush_instance(&self, name: &str, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        let instance_priv = self.inner.priv_of(name)?;
        stack::read_lock_sync(&cache, intr)?;
        let result = self.inner.flush_sync(&cache, &instance_priv, true, intr);
        cache.read_unlock();
        result
    }

    /// Interruptible flush of a single core.
    pub fn flush_core(&self, name: &str, core_id: CoreId, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        let instance_priv = self.inner.priv_of(name)?;
        stack::read_lock_sync(&cache, intr)?;
        let result = self
            .inner
            .flush_core_sync(&cache, core_id, &instance_priv, intr);
        cache.read_unlock();
        result
    }

    /// Discards the instance's dirty data without writing it back.
    pub fn purge_instance(&self, name: &str, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;
        let (call, completer) = SyncCall::new();
        cache.purge(completer.into_callback());
        let status = call.wait();
        cache.unlock();
        engine_status("purge", status)
    }

    /// Discards one core's dirty data without writing it back.
    pub fn purge_core(&self, name: &str, core_id: CoreId, intr: &Interruptor) -> Result<()> {
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;
        let (call, completer) = SyncCall::new();
        cache.purge_core(core_id, completer.into_callback());
        let status = call.wait();
        cache.unlock();
        engine_status("purge_core", status)
    }

    /// Interrupts an in-flight flush, but only while an interruptible flush
    /// window is open; a flush that must finish (final stop flush) cannot be
    /// cut short from here.
    pub fn interrupt_flushing(&self, name: &str) -> Result<()> {
        let cache = self.inner.get(name)?;
        let instance_priv = self.inner.priv_of(name)?;
        if instance_priv
            .flush_interrupt_enabled
            .load(std::sync::atomic::Ordering::Acquire)
        {
            cache.flush_interrupt();
            info!(cache = name, "flush interrupted on request");
        } else {
            debug!(cache = name, "no interruptible flush in progress");
        }
        Ok(())
    }

    /// Lock, mutate, persist when attached, unlock.
    fn with_saved_change(
        &self,
        name: &str,
        intr: &Interruptor,
        change: impl FnOnce(&CacheRef),
    ) -> Result<()> {
        let cache = self.inner.get(name)?;
        stack::lock_sync(&cache, intr)?;
        change(&cache);
        let saved = if cache.is_attached() {
            stack::save_sync(&cache)
        } else {
            Ok(())
        };
        cache.unlock();
        saved
    }
}
