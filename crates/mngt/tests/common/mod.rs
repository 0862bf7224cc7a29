//! Shared harness: a manager wired to the simulator, plus request builders.

// not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use velocache_core::{
    CacheConfig, CacheMode, CacheName, CoreConfig, DeviceConfig, DeviceProperties, InitMode,
    StartRequest,
};
use velocache_engine::sim::{SimClassifier, SimDeviceFactory, SimEngine};
use velocache_mngt::CacheManager;

pub struct Harness {
    pub manager: CacheManager,
    pub engine: Arc<SimEngine>,
    pub classifier: Arc<SimClassifier>,
    pub devices: Arc<SimDeviceFactory>,
}

pub fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let engine = Arc::new(SimEngine::new());
    let classifier = Arc::new(SimClassifier::new());
    let devices = Arc::new(SimDeviceFactory::new());
    let manager = CacheManager::new(
        Arc::clone(&engine) as _,
        Arc::clone(&classifier) as _,
        Arc::clone(&devices) as _,
    );
    Harness {
        manager,
        engine,
        classifier,
        devices,
    }
}

pub fn device(path: &str) -> DeviceConfig {
    DeviceConfig {
        path: path.to_string(),
        properties: DeviceProperties {
            block_size: 512,
            size_bytes: 1 << 30,
        },
        force: false,
    }
}

pub fn start_req(name: &str, init: InitMode) -> StartRequest {
    StartRequest {
        cache: CacheConfig {
            name: CacheName::new(name).unwrap(),
            id: None,
            mode: CacheMode::WriteBack,
            line_size: 4096,
            queue_count: 2,
        },
        device: device(&format!("/dev/fast-{name}")),
        init,
        lower: None,
    }
}

pub fn core_cfg(name: &str, path: &str) -> CoreConfig {
    CoreConfig {
        name: CacheName::new(name).unwrap(),
        core_id: None,
        path: path.to_string(),
        properties: DeviceProperties {
            block_size: 512,
            size_bytes: 1 << 32,
        },
    }
}

/// Polls `cond` until it holds or two seconds pass.
pub fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(1));
    }
}
