use crate::types::CacheState;

/// Result type alias for velocache operations
pub type Result<T> = std::result::Result<T, Error>;

/// Status reported by an asynchronous engine completion.
///
/// `Ok(())` means the engine operation succeeded; the error variants mirror
/// the failure codes the engine hands back through its completion callbacks.
pub type EngineResult = std::result::Result<(), EngineError>;

/// Failure codes reported by the caching engine.
///
/// These are propagated verbatim through the management layer after any
/// necessary local rollback has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine could not allocate memory for the operation
    #[error("engine out of memory")]
    NoMem,

    /// No cache instance with the requested name or id exists
    #[error("no such cache instance")]
    NotExist,

    /// A cache instance with the requested name or id already exists
    #[error("cache instance already exists")]
    Exists,

    /// An in-progress flush was interrupted on user request
    #[error("flushing has been interrupted")]
    FlushingInterrupted,

    /// The cache is missing cores and cannot be flushed reliably
    #[error("cache is in an incomplete state")]
    IncompleteState,

    /// The final metadata write during stop failed; dirty data remains
    #[error("cache device write failure during stop")]
    WriteCache,

    /// On-device metadata does not match the requested configuration
    #[error("metadata on the cache device does not match")]
    MetadataMismatch,

    /// The operation requires a standby instance
    #[error("cache instance is not in standby state")]
    NotStandby,

    /// The device is already claimed by another instance or core
    #[error("device is busy")]
    DeviceBusy,

    /// The engine rejected the supplied configuration
    #[error("configuration rejected by the engine")]
    InvalidConfig,

    /// The operation is not permitted in the instance's current state
    #[error("operation not permitted in the current cache state")]
    InvalidState,
}

/// Core error type for velocache management operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No cache instance with this name is known
    #[error("cache instance '{name}' not found")]
    NotFound { name: String },

    /// A cache instance with this name already exists
    #[error("cache instance '{name}' already exists")]
    AlreadyExists { name: String },

    /// The requested name is not a valid cache or core name
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Configuration failed validation before any engine call was made
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// The instance is in the wrong state for this operation
    #[error("cache instance '{name}' is {actual}, expected {expected}")]
    WrongState {
        name: String,
        expected: CacheState,
        actual: CacheState,
    },

    /// The device does not match the geometry recorded for the instance
    #[error("device '{path}' is incompatible: {reason}")]
    DeviceIncompatible { path: String, reason: String },

    /// Stack-wide removal targets anything but the topmost member
    #[error("'{name}' is not the topmost member of its cache stack")]
    NotTopmost { name: String },

    /// The stack changed between the pre-check and the locked re-check
    #[error("cache stack topology changed during '{operation}'")]
    TopologyChanged { operation: String },

    /// The caller stopped waiting; the operation still completes in the
    /// background and its outcome will not be reported
    #[error("operation '{operation}' interrupted; it will complete in the background")]
    Interrupted { operation: String },

    /// The instance was stopped, but a failed flush left dirty data on the
    /// cache device
    #[error("cache instance stopped, but dirty data remains on the cache device")]
    StoppedDirty,

    /// An engine operation reported a failure
    #[error("engine operation '{operation}' failed: {source}")]
    Engine {
        operation: String,
        #[source]
        source: EngineError,
    },

    /// An OS-level resource (thread, queue) could not be set up
    #[error("system failure during '{operation}': {message}")]
    System { operation: String, message: String },
}

impl Error {
    /// Wrap an engine failure with the operation it occurred in
    pub fn engine(operation: impl Into<String>, source: EngineError) -> Self {
        Error::Engine {
            operation: operation.into(),
            source,
        }
    }

    /// Interruption of a named operation
    pub fn interrupted(operation: impl Into<String>) -> Self {
        Error::Interrupted {
            operation: operation.into(),
        }
    }

    /// OS-level failure with context
    pub fn system(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::System {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for the distinguished "caller detached, work continues" status.
    ///
    /// Never combined with a real error: an operation reports either a
    /// failure or interruption, not both.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }
}

/// Map an engine status to a management result, tagging the operation name.
pub fn engine_status(operation: &str, status: EngineResult) -> Result<()> {
    status.map_err(|source| Error::engine(operation, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_is_carried_as_source() {
        let err = Error::engine("attach", EngineError::NoMem);
        assert!(err.to_string().contains("attach"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn interrupted_is_distinguished() {
        assert!(Error::interrupted("stop").is_interrupted());
        assert!(!Error::StoppedDirty.is_interrupted());
        assert!(!Error::engine("flush", EngineError::FlushingInterrupted).is_interrupted());
    }

    #[test]
    fn engine_status_maps_ok_and_err() {
        assert!(engine_status("lock", Ok(())).is_ok());
        let err = engine_status("lock", Err(EngineError::NotExist)).unwrap_err();
        assert!(matches!(
            err,
            Error::Engine {
                source: EngineError::NotExist,
                ..
            }
        ));
    }
}
