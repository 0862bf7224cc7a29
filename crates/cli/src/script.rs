//! JSON management scripts executed against the simulator engine.
//!
//! A script is a JSON array of steps, each tagged with an `op` field. Every
//! run gets a fresh simulator; scripts are for demonstrating and exercising
//! the management layer, not for driving real devices.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use eyre::WrapErr;
use serde::Deserialize;
use tracing::info;
use velocache_core::{
    ActivateConfig, CacheMode, CacheName, CleaningParam, CleaningPolicy, CoreConfig, CoreId,
    DeviceConfig, DeviceProperties, InitMode, SeqCutoffPolicy, StartRequest,
};
use velocache_engine::sim::{SimClassifier, SimDeviceFactory, SimEngine};
use velocache_engine::{ClassId, ClassRule};
use velocache_mngt::{CacheManager, Interruptor};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Step {
    Start {
        #[serde(flatten)]
        request: StartRequest,
    },
    AttachDevice {
        cache: String,
        device: DeviceConfig,
    },
    DetachDevice {
        cache: String,
    },
    Activate {
        cache: String,
        device: DeviceConfig,
    },
    Exit {
        cache: String,
        #[serde(default = "default_true")]
        flush: bool,
    },
    Remove {
        cache: String,
    },
    AddCore {
        cache: String,
        core: CoreConfig,
    },
    RemoveCore {
        cache: String,
        core_id: u16,
        #[serde(default)]
        flush: bool,
    },
    DetachCore {
        cache: String,
        core_id: u16,
        #[serde(default)]
        flush: bool,
    },
    Flush {
        cache: String,
    },
    FlushCore {
        cache: String,
        core_id: u16,
    },
    Purge {
        cache: String,
    },
    PurgeCore {
        cache: String,
        core_id: u16,
    },
    SetMode {
        cache: String,
        mode: CacheMode,
    },
    SetCleaning {
        cache: String,
        policy: CleaningPolicy,
    },
    SetSeqCutoff {
        cache: String,
        #[serde(default)]
        core_id: Option<u16>,
        policy: SeqCutoffPolicy,
        threshold: u32,
    },
    SetCleaningParam {
        cache: String,
        param: CleaningParam,
        value: u32,
    },
    SetClassRules {
        cache: String,
        rules: Vec<RuleSpec>,
    },
    ResetStats {
        cache: String,
    },
    List,
    Info {
        cache: String,
    },
}

/// One classification rule as it appears in a script.
#[derive(Debug, Deserialize)]
struct RuleSpec {
    class: u16,
    condition: String,
    #[serde(default)]
    priority: i16,
}

fn default_true() -> bool {
    true
}

fn fresh_manager() -> CacheManager {
    let engine = Arc::new(SimEngine::new());
    let classifier = Arc::new(SimClassifier::new());
    let devices = Arc::new(SimDeviceFactory::new());
    CacheManager::new(engine, classifier, devices)
}

pub fn run_file(path: &Path) -> eyre::Result<()> {
    let text =
        fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    let steps: Vec<Step> =
        serde_json::from_str(&text).wrap_err("parsing the management script")?;

    let manager = fresh_manager();
    let intr = Interruptor::new();
    for (index, step) in steps.into_iter().enumerate() {
        apply(&manager, &intr, step).wrap_err_with(|| format!("script step {}", index + 1))?;
    }
    Ok(())
}

/// A canned scenario: a two-level stack with a core, flushed and torn down.
pub fn demo() -> eyre::Result<()> {
    let manager = fresh_manager();
    let intr = Interruptor::new();

    let lower = start_request("l2", "/dev/fast0", InitMode::New, None)?;
    manager.start_instance(&lower, &intr)?;

    let upper = start_request("l1", "/dev/faster0", InitMode::New, Some("l2"))?;
    manager.start_instance(&upper, &intr)?;

    manager.add_core(
        "l2",
        &CoreConfig {
            name: CacheName::new("data0")?,
            core_id: None,
            path: "/dev/slow0".to_string(),
            properties: DeviceProperties {
                block_size: 512,
                size_bytes: 1 << 34,
            },
        },
        &intr,
    )?;

    for instance in manager.list_instances() {
        info!(
            cache = %instance.name,
            id = %instance.id,
            state = %instance.state,
            cores = instance.core_count,
            "demo instance"
        );
    }

    manager.flush_instance("l2", &intr)?;
    manager.remove_from_stack("l1", &intr)?;
    manager.exit_instance("l2", true, &intr)?;
    info!("demo complete, all instances stopped");
    Ok(())
}

fn start_request(
    name: &str,
    path: &str,
    init: InitMode,
    lower: Option<&str>,
) -> eyre::Result<StartRequest> {
    Ok(StartRequest {
        cache: velocache_core::CacheConfig {
            name: CacheName::new(name)?,
            id: None,
            mode: CacheMode::WriteBack,
            line_size: 4096,
            queue_count: 2,
        },
        device: DeviceConfig {
            path: path.to_string(),
            properties: DeviceProperties {
                block_size: 512,
                size_bytes: 1 << 30,
            },
            force: false,
        },
        init,
        lower: lower.map(CacheName::new).transpose()?,
    })
}

fn apply(manager: &CacheManager, intr: &Interruptor, step: Step) -> eyre::Result<()> {
    match step {
        Step::Start { request } => {
            manager.start_instance(&request, intr)?;
            info!(cache = %request.cache.name, "started");
        }
        Step::AttachDevice { cache, device } => {
            manager.attach_device(&cache, &device, intr)?;
        }
        Step::DetachDevice { cache } => {
            manager.detach_device(&cache, intr)?;
        }
        Step::Activate { cache, device } => {
            manager.activate(&cache, &ActivateConfig { device }, intr)?;
        }
        Step::Exit { cache, flush } => {
            manager.exit_instance(&cache, flush, intr)?;
        }
        Step::Remove { cache } => {
            manager.remove_from_stack(&cache, intr)?;
        }
        Step::AddCore { cache, core } => {
            let id = manager.add_core(&cache, &core, intr)?;
            info!(cache, core = %id, "core added");
        }
        Step::RemoveCore {
            cache,
            core_id,
            flush,
        } => {
            manager.remove_core(&cache, CoreId::new(core_id)?, flush, intr)?;
        }
        Step::DetachCore {
            cache,
            core_id,
            flush,
        } => {
            manager.detach_core(&cache, CoreId::new(core_id)?, flush, intr)?;
        }
        Step::Flush { cache } => {
            manager.flush_instance(&cache, intr)?;
        }
        Step::FlushCore { cache, core_id } => {
            manager.flush_core(&cache, CoreId::new(core_id)?, intr)?;
        }
        Step::Purge { cache } => {
            manager.purge_instance(&cache, intr)?;
        }
        Step::PurgeCore { cache, core_id } => {
            manager.purge_core(&cache, CoreId::new(core_id)?, intr)?;
        }
        Step::SetClassRules { cache, rules } => {
            let rules: Vec<ClassRule> = rules
                .into_iter()
                .map(|r| ClassRule {
                    class: ClassId(r.class),
                    condition: r.condition,
                    priority: r.priority,
                })
                .collect();
            manager.set_class_rules(&cache, &rules, intr)?;
        }
        Step::SetMode { cache, mode } => {
            manager.set_cache_mode(&cache, mode, intr)?;
        }
        Step::SetCleaning { cache, policy } => {
            manager.set_cleaning_policy(&cache, policy, intr)?;
        }
        Step::SetSeqCutoff {
            cache,
            core_id,
            policy,
            threshold,
        } => {
            let core = core_id.map(CoreId::new).transpose()?;
            manager.set_seq_cutoff(&cache, core, policy, threshold, intr)?;
        }
        Step::SetCleaningParam {
            cache,
            param,
            value,
        } => {
            manager.set_cleaning_param(&cache, param, value, intr)?;
        }
        Step::ResetStats { cache } => {
            manager.reset_stats(&cache, intr)?;
        }
        Step::List => {
            let listed = manager.list_instances();
            println!("{}", serde_json::to_string_pretty(&listed)?);
        }
        Step::Info { cache } => {
            let info = manager.instance_info(&cache, intr)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn script_round_trips_through_the_manager() {
        let script = r#"[
            {"op": "start",
             "cache": {"name": "c1", "mode": "write-back"},
             "device": {"path": "/dev/fast0",
                        "properties": {"block_size": 512, "size_bytes": 1073741824}}},
            {"op": "add-core",
             "cache": "c1",
             "core": {"name": "data0", "path": "/dev/slow0",
                      "properties": {"block_size": 512, "size_bytes": 4294967296}}},
            {"op": "flush", "cache": "c1"},
            {"op": "set-class-rules", "cache": "c1",
             "rules": [{"class": 1, "condition": "file_size:le:4096"}]},
            {"op": "purge-core", "cache": "c1", "core_id": 0},
            {"op": "detach-core", "cache": "c1", "core_id": 0},
            {"op": "info", "cache": "c1"},
            {"op": "exit", "cache": "c1"}
        ]"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(script.as_bytes()).unwrap();
        run_file(file.path()).unwrap();
    }

    #[test]
    fn demo_scenario_runs_to_completion() {
        demo().unwrap();
    }

    #[test]
    fn unknown_op_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"[{"op": "frobnicate"}]"#).unwrap();
        assert!(run_file(file.path()).is_err());
    }
}
