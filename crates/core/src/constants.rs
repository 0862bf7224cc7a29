//! Shared limits and defaults for the management layer.

/// Highest permitted cache instance id, inclusive.
pub const MAX_CACHE_ID: u16 = 16_384;

/// Highest permitted core device id within one instance, inclusive.
pub const MAX_CORE_ID: u16 = 4_095;

/// Longest accepted cache or core name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Number of I/O queues started per instance when the configuration does not
/// say otherwise.
pub const DEFAULT_QUEUE_COUNT: usize = 4;

/// Smallest accepted cache line size, in bytes.
pub const MIN_LINE_SIZE: u32 = 4 * 1024;

/// Largest accepted cache line size, in bytes.
pub const MAX_LINE_SIZE: u32 = 64 * 1024;
