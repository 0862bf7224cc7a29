//! The exported-device data path contract.
//!
//! For every core device under a running instance the data path exposes a new
//! block device applications do their I/O against. The management layer
//! creates these as the last step of a successful bring-up and destroys them
//! *before* the final engine stop, so a dying exported device can never
//! observe a half-torn-down cache.

use crate::contract::{CacheRef, CoreRef};
use velocache_core::Result;

pub trait DeviceFactory: Send + Sync {
    /// Create the exported block device for one core of an instance.
    fn create_exported(&self, cache: &CacheRef, core: &CoreRef) -> Result<()>;

    /// Destroy the exported device of one core. Idempotent.
    fn destroy_exported(&self, cache: &CacheRef, core: &CoreRef) -> Result<()>;

    /// Destroy every exported device of an instance. Idempotent.
    fn destroy_all_exported(&self, cache: &CacheRef) -> Result<()>;
}
