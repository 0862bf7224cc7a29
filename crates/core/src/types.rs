//! Newtype wrappers and domain enums for enhanced type safety

use crate::constants::{MAX_CACHE_ID, MAX_CORE_ID, MAX_NAME_LEN};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::Deref;
use std::str::FromStr;

/// A validated cache instance name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheName(String);

impl CacheName {
    /// Create a new CacheName with validation
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidName {
                name,
                reason: "name must not be empty".to_string(),
            });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidName {
                name,
                reason: format!("name must not exceed {MAX_NAME_LEN} bytes"),
            });
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(Error::InvalidName {
                name,
                reason: "name must contain only ASCII alphanumerics, '_', '-' and '.'"
                    .to_string(),
            });
        }
        Ok(CacheName(name))
    }

    /// Create a CacheName without validation (input must already be valid)
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for CacheName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for CacheName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Numeric identifier of a cache instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheId(u16);

impl CacheId {
    /// Create a new CacheId, rejecting values beyond the permitted range
    pub fn new(id: u16) -> Result<Self> {
        if id == 0 || id > MAX_CACHE_ID {
            return Err(Error::InvalidConfig {
                message: format!("cache id {id} outside the range 1..={MAX_CACHE_ID}"),
            });
        }
        Ok(CacheId(id))
    }

    /// The raw id value
    pub fn get(self) -> u16 {
        self.0
    }
}

impl Display for CacheId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric identifier of a core (backing) device within one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoreId(u16);

impl CoreId {
    /// Create a new CoreId, rejecting values beyond the permitted range
    pub fn new(id: u16) -> Result<Self> {
        if id > MAX_CORE_ID {
            return Err(Error::InvalidConfig {
                message: format!("core id {id} outside the range 0..={MAX_CORE_ID}"),
            });
        }
        Ok(CoreId(id))
    }

    /// The raw id value
    pub fn get(self) -> u16 {
        self.0
    }
}

impl Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a cache instance, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// Fully started, serving I/O
    Running,
    /// Metadata mirror only; waiting for activation
    Standby,
    /// Teardown in progress
    Stopping,
}

impl Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheState::Running => "running",
            CacheState::Standby => "standby",
            CacheState::Stopping => "stopping",
        };
        write!(f, "{s}")
    }
}

/// Caching mode of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    WriteThrough,
    WriteBack,
    WriteAround,
    PassThrough,
    WriteOnly,
}

impl Default for CacheMode {
    fn default() -> Self {
        CacheMode::WriteThrough
    }
}

impl Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheMode::WriteThrough => "write-through",
            CacheMode::WriteBack => "write-back",
            CacheMode::WriteAround => "write-around",
            CacheMode::PassThrough => "pass-through",
            CacheMode::WriteOnly => "write-only",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CacheMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "wt" | "write-through" => Ok(CacheMode::WriteThrough),
            "wb" | "write-back" => Ok(CacheMode::WriteBack),
            "wa" | "write-around" => Ok(CacheMode::WriteAround),
            "pt" | "pass-through" => Ok(CacheMode::PassThrough),
            "wo" | "write-only" => Ok(CacheMode::WriteOnly),
            other => Err(Error::InvalidConfig {
                message: format!("unknown cache mode '{other}'"),
            }),
        }
    }
}

/// Dirty-data cleaning policy of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleaningPolicy {
    /// No background cleaning
    Nop,
    /// Approximately-LRU background cleaning
    Alru,
    /// Aggressive cleaning policy
    Acp,
}

impl Display for CleaningPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleaningPolicy::Nop => "nop",
            CleaningPolicy::Alru => "alru",
            CleaningPolicy::Acp => "acp",
        };
        write!(f, "{s}")
    }
}

/// Tunable parameter of the active cleaning policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleaningParam {
    /// Cleaner wake-up interval, milliseconds
    WakeUpTime,
    /// Age dirty data must reach before the cleaner considers it, seconds
    StalenessTime,
    /// Dirty blocks written back per cleaner iteration
    FlushMaxBuffers,
    /// I/O-idle time before cleaning starts, milliseconds
    ActivityThreshold,
}

impl Display for CleaningParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CleaningParam::WakeUpTime => "wake-up-time",
            CleaningParam::StalenessTime => "staleness-time",
            CleaningParam::FlushMaxBuffers => "flush-max-buffers",
            CleaningParam::ActivityThreshold => "activity-threshold",
        };
        write!(f, "{s}")
    }
}

/// Sequential I/O cutoff policy of a core device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqCutoffPolicy {
    /// Bypass the cache for sequential streams unconditionally
    Always,
    /// Bypass only once the cache is full
    Full,
    /// Never bypass
    Never,
}

impl Display for SeqCutoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SeqCutoffPolicy::Always => "always",
            SeqCutoffPolicy::Full => "full",
            SeqCutoffPolicy::Never => "never",
        };
        write!(f, "{s}")
    }
}

/// Geometry an instance records for its cache device.
///
/// Used to verify that a device offered to `attach_device` or `activate`
/// matches what the instance's metadata was laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Logical block size in bytes
    pub block_size: u32,
    /// Total device size in bytes
    pub size_bytes: u64,
}

impl DeviceProperties {
    /// Check an offered device against the recorded geometry.
    ///
    /// The block size must match exactly; the offered device may be larger
    /// than recorded, never smaller.
    pub fn compatible_with(&self, offered: &DeviceProperties) -> std::result::Result<(), String> {
        if offered.block_size != self.block_size {
            return Err(format!(
                "block size {} does not match recorded {}",
                offered.block_size, self.block_size
            ));
        }
        if offered.size_bytes < self.size_bytes {
            return Err(format!(
                "device size {} smaller than recorded {}",
                offered.size_bytes, self.size_bytes
            ));
        }
        Ok(())
    }
}

/// Snapshot of one instance, as returned by the info operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub name: CacheName,
    pub id: CacheId,
    pub state: CacheState,
    pub attached: bool,
    pub mode: CacheMode,
    pub dirty_blocks: u64,
    pub core_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_name_accepts_reasonable_names() {
        assert!(CacheName::new("cache1").is_ok());
        assert!(CacheName::new("nvme0n1-meta.0").is_ok());
    }

    #[test]
    fn cache_name_rejects_bad_names() {
        assert!(CacheName::new("").is_err());
        assert!(CacheName::new("has space").is_err());
        assert!(CacheName::new("slash/name").is_err());
        assert!(CacheName::new("x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn cache_id_range() {
        assert!(CacheId::new(0).is_err());
        assert!(CacheId::new(1).is_ok());
        assert!(CacheId::new(MAX_CACHE_ID).is_ok());
        assert!(CacheId::new(MAX_CACHE_ID + 1).is_err());
    }

    #[test]
    fn device_compatibility() {
        let recorded = DeviceProperties {
            block_size: 512,
            size_bytes: 1 << 30,
        };
        assert!(recorded.compatible_with(&recorded).is_ok());
        assert!(recorded
            .compatible_with(&DeviceProperties {
                block_size: 4096,
                size_bytes: 1 << 30,
            })
            .is_err());
        assert!(recorded
            .compatible_with(&DeviceProperties {
                block_size: 512,
                size_bytes: 1 << 20,
            })
            .is_err());
        assert!(recorded
            .compatible_with(&DeviceProperties {
                block_size: 512,
                size_bytes: 1 << 31,
            })
            .is_ok());
    }

    #[test]
    fn cache_mode_round_trips_through_str() {
        for mode in [
            CacheMode::WriteThrough,
            CacheMode::WriteBack,
            CacheMode::WriteAround,
            CacheMode::PassThrough,
            CacheMode::WriteOnly,
        ] {
            assert_eq!(mode.to_string().parse::<CacheMode>().unwrap(), mode);
        }
        assert_eq!("wb".parse::<CacheMode>().unwrap(), CacheMode::WriteBack);
        assert!("wx".parse::<CacheMode>().is_err());
    }
}
