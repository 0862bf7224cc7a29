//! Simulated classifier and exported-device data path.

use crate::classifier::{ClassId, ClassRule, Classifier, IoDescriptor};
use crate::contract::{CacheRef, CoreRef};
use crate::volume::DeviceFactory;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use tracing::debug;
use velocache_core::{Error, Result};

/// Classifier stand-in: tracks attachment, classifies everything as class 0.
#[derive(Default)]
pub struct SimClassifier {
    attached: DashSet<String>,
    rules: DashMap<String, Vec<ClassRule>>,
    fail_next_attach: Mutex<bool>,
}

impl SimClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `attach` fail, to exercise local rollback paths.
    pub fn fail_next_attach(&self) {
        *self.fail_next_attach.lock() = true;
    }

    pub fn is_attached(&self, cache_name: &str) -> bool {
        self.attached.contains(cache_name)
    }

    /// Rules currently applied to `cache_name`.
    pub fn rules_for(&self, cache_name: &str) -> Vec<ClassRule> {
        self.rules
            .get(cache_name)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }
}

impl Classifier for SimClassifier {
    fn attach(&self, cache: &CacheRef) -> Result<()> {
        if std::mem::take(&mut *self.fail_next_attach.lock()) {
            return Err(Error::system("classifier attach", "injected failure"));
        }
        self.attached.insert(cache.name().as_str().to_string());
        debug!(cache = %cache.name(), "sim: classifier attached");
        Ok(())
    }

    fn detach(&self, cache: &CacheRef) {
        if self.attached.remove(cache.name().as_str()).is_some() {
            debug!(cache = %cache.name(), "sim: classifier detached");
        }
        self.rules.remove(cache.name().as_str());
    }

    fn apply_rules(&self, cache: &CacheRef, rules: &[ClassRule]) -> Result<()> {
        if !self.attached.contains(cache.name().as_str()) {
            return Err(Error::system(
                "classifier rules",
                "classifier not attached",
            ));
        }
        self.rules
            .insert(cache.name().as_str().to_string(), rules.to_vec());
        Ok(())
    }

    fn classify(&self, _cache: &CacheRef, _io: &IoDescriptor) -> ClassId {
        ClassId(0)
    }
}

/// Exported-device stand-in: records which `cache/core` devices exist.
#[derive(Default)]
pub struct SimDeviceFactory {
    exported: DashSet<String>,
    fail_next_create: Mutex<bool>,
}

impl SimDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(cache: &CacheRef, core: &CoreRef) -> String {
        format!("{}/{}", cache.name(), core.name())
    }

    /// Make the next `create_exported` fail, to exercise inverse rollback.
    pub fn fail_next_create(&self) {
        *self.fail_next_create.lock() = true;
    }

    /// Number of exported devices currently alive for `cache_name`.
    pub fn exported_count(&self, cache_name: &str) -> usize {
        let prefix = format!("{cache_name}/");
        self.exported
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .count()
    }
}

impl DeviceFactory for SimDeviceFactory {
    fn create_exported(&self, cache: &CacheRef, core: &CoreRef) -> Result<()> {
        if std::mem::take(&mut *self.fail_next_create.lock()) {
            return Err(Error::system("create exported device", "injected failure"));
        }
        self.exported.insert(Self::key(cache, core));
        debug!(cache = %cache.name(), core = %core.name(), "sim: exported device created");
        Ok(())
    }

    fn destroy_exported(&self, cache: &CacheRef, core: &CoreRef) -> Result<()> {
        self.exported.remove(&Self::key(cache, core));
        Ok(())
    }

    fn destroy_all_exported(&self, cache: &CacheRef) -> Result<()> {
        let prefix = format!("{}/", cache.name());
        let stale: Vec<String> = self
            .exported
            .iter()
            .filter(|k| k.starts_with(&prefix))
            .map(|k| k.key().clone())
            .collect();
        for key in stale {
            self.exported.remove(&key);
        }
        Ok(())
    }
}
