//! The I/O classification contract.
//!
//! The classifier assigns every request to an I/O class the engine's
//! per-class policies act on. The management layer only brings it up during
//! instance finalization, tears it down first during teardown, and forwards
//! rule updates; classification itself is a pure function it never inspects.

use crate::contract::CacheRef;
use velocache_core::Result;

/// An I/O class id, `0` being the default/unclassified class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u16);

/// The request attributes classification sees.
#[derive(Debug, Clone)]
pub struct IoDescriptor {
    pub lba: u64,
    pub len: u32,
    pub write: bool,
}

/// One classification rule, matched in priority order.
#[derive(Debug, Clone)]
pub struct ClassRule {
    pub class: ClassId,
    /// Rule condition in the classifier's own syntax
    pub condition: String,
    pub priority: i16,
}

pub trait Classifier: Send + Sync {
    /// Bring classification up for a finalized instance.
    fn attach(&self, cache: &CacheRef) -> Result<()>;

    /// Tear classification down; first step of instance teardown. Must be
    /// idempotent: teardown paths may run it on an instance that never
    /// finished bring-up.
    fn detach(&self, cache: &CacheRef);

    /// Replace the instance's rule set.
    fn apply_rules(&self, cache: &CacheRef, rules: &[ClassRule]) -> Result<()>;

    /// Classify one request. Pure; never blocks.
    fn classify(&self, cache: &CacheRef, io: &IoDescriptor) -> ClassId;
}
