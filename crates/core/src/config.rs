//! Configuration types a management operation is built from.
//!
//! These are constructed by the command layer (CLI, scripts) and validated
//! before any lock or engine call is made; validation failures are
//! precondition errors and never require rollback.

use crate::constants::{DEFAULT_QUEUE_COUNT, MAX_LINE_SIZE, MIN_LINE_SIZE};
use crate::errors::{Error, Result};
use crate::types::{CacheId, CacheMode, CacheName, CoreId, DeviceProperties};
use serde::{Deserialize, Serialize};

/// How a new instance comes up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InitMode {
    /// Initialize fresh metadata on the cache device
    New,
    /// Load existing metadata from the cache device
    Load,
    /// Come up as a detached failover standby
    Standby,
    /// Come up as a standby, loading existing metadata
    StandbyLoad,
}

impl InitMode {
    /// Standby variants bring the instance up without an exported device
    pub fn is_standby(self) -> bool {
        matches!(self, InitMode::Standby | InitMode::StandbyLoad)
    }
}

/// Identity and policy of a new cache instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub name: CacheName,
    /// Explicit id; the lowest free id is taken when absent
    #[serde(default)]
    pub id: Option<CacheId>,
    #[serde(default)]
    pub mode: CacheMode,
    /// Cache line size in bytes
    #[serde(default = "default_line_size")]
    pub line_size: u32,
    /// Number of I/O queues (and queue worker threads) to start
    #[serde(default = "default_queue_count")]
    pub queue_count: usize,
}

fn default_line_size() -> u32 {
    MIN_LINE_SIZE
}

fn default_queue_count() -> usize {
    DEFAULT_QUEUE_COUNT
}

impl CacheConfig {
    /// Validate policy fields; name and id validate on construction
    pub fn validate(&self) -> Result<()> {
        if self.line_size < MIN_LINE_SIZE
            || self.line_size > MAX_LINE_SIZE
            || !self.line_size.is_power_of_two()
        {
            return Err(Error::InvalidConfig {
                message: format!(
                    "line size {} must be a power of two in {MIN_LINE_SIZE}..={MAX_LINE_SIZE}",
                    self.line_size
                ),
            });
        }
        if self.queue_count == 0 {
            return Err(Error::InvalidConfig {
                message: "queue count must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// The cache (fast) device backing an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Path of the block device
    pub path: String,
    pub properties: DeviceProperties,
    /// Overwrite a dirty shutdown marker on the device
    #[serde(default)]
    pub force: bool,
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::InvalidConfig {
                message: "device path must not be empty".to_string(),
            });
        }
        if self.properties.block_size == 0 || !self.properties.block_size.is_power_of_two() {
            return Err(Error::InvalidConfig {
                message: format!(
                    "block size {} must be a nonzero power of two",
                    self.properties.block_size
                ),
            });
        }
        if self.properties.size_bytes == 0 {
            return Err(Error::InvalidConfig {
                message: "device size must not be zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A core (backed) device added under an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub name: CacheName,
    #[serde(default)]
    pub core_id: Option<CoreId>,
    pub path: String,
    pub properties: DeviceProperties,
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::InvalidConfig {
                message: "core device path must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything `start_instance` needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub cache: CacheConfig,
    pub device: DeviceConfig,
    #[serde(default = "default_init_mode")]
    pub init: InitMode,
    /// When set, join the new instance on top of this stack member
    #[serde(default)]
    pub lower: Option<CacheName>,
}

fn default_init_mode() -> InitMode {
    InitMode::New
}

impl StartRequest {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.device.validate()?;
        if self.init.is_standby() && self.lower.is_some() {
            return Err(Error::InvalidConfig {
                message: "a standby instance cannot join a cache stack".to_string(),
            });
        }
        Ok(())
    }
}

/// Everything `activate` needs to promote a standby instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateConfig {
    pub device: DeviceConfig,
}

impl ActivateConfig {
    pub fn validate(&self) -> Result<()> {
        self.device.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceConfig {
        DeviceConfig {
            path: "/dev/nvme0n1".to_string(),
            properties: DeviceProperties {
                block_size: 512,
                size_bytes: 1 << 30,
            },
            force: false,
        }
    }

    fn cache_cfg() -> CacheConfig {
        CacheConfig {
            name: CacheName::new("cache1").unwrap(),
            id: None,
            mode: CacheMode::WriteBack,
            line_size: default_line_size(),
            queue_count: default_queue_count(),
        }
    }

    #[test]
    fn valid_request_passes() {
        let req = StartRequest {
            cache: cache_cfg(),
            device: device(),
            init: InitMode::New,
            lower: None,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn bad_line_size_is_rejected() {
        let mut cfg = cache_cfg();
        cfg.line_size = 3000;
        assert!(cfg.validate().is_err());
        cfg.line_size = MAX_LINE_SIZE * 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn standby_cannot_join_a_stack() {
        let req = StartRequest {
            cache: cache_cfg(),
            device: device(),
            init: InitMode::Standby,
            lower: Some(CacheName::new("lower").unwrap()),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{
            "cache": { "name": "cache1" },
            "device": {
                "path": "/dev/nvme0n1",
                "properties": { "block_size": 512, "size_bytes": 1073741824 }
            }
        }"#;
        let req: StartRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.init, InitMode::New);
        assert_eq!(req.cache.queue_count, DEFAULT_QUEUE_COUNT);
        assert!(req.validate().is_ok());
    }
}
