//! # Backend
//!
//! The single background thread that merges every producer queue into one
//! timestamp-ordered stream and hands it to the output handlers.
//!
//! ## Components
//!
//! - [`BackendWorker`]: start-once / stop-idempotent lifecycle and the thread main
//! - [`process_next_record`]: one merge-and-dispatch step
//! - [`PlatformAdapter`]: CPU pinning and thread naming
//! - [`BackendMetrics`]: counters exposed while the backend runs
//!
//! ## Thread Phases
//!
//! ```text
//! bootstrap ──► main loop ──stop()──► drain ──► flush handlers ──► exit
//! (affinity,    (dispatch or           (dispatch until
//!  name, clock)  sleep when idle)       every queue is empty)
//! ```

mod dispatch;
mod metrics;
pub mod platform;
mod worker;

pub use dispatch::process_next_record;
pub use metrics::{BackendMetrics, BackendMetricsSnapshot};
pub use platform::{NativePlatform, PlatformAdapter, PlatformError};
pub use worker::{BackendWorker, LifecycleState};

/// Errors from the backend worker.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration was changed after the backend started
    #[error("Backend already started")]
    AlreadyStarted,

    /// Another worker is already consuming the producer registry
    #[error("Producer registry already has a backend consumer")]
    ConsumerAttached,

    /// Failed to spawn the backend thread
    #[error("Failed to spawn backend thread: {message}")]
    SpawnFailed {
        /// Error message
        message: String,
    },

    /// Failed to pin the backend thread
    #[error("Failed to set CPU affinity to {cpu}: {source}")]
    AffinityFailed {
        /// Requested CPU
        cpu: usize,
        /// The platform error
        #[source]
        source: PlatformError,
    },

    /// Failed to name the backend thread
    #[error("Failed to set thread name {name:?}: {source}")]
    ThreadNameFailed {
        /// Requested name
        name: String,
        /// The platform error
        #[source]
        source: PlatformError,
    },

    /// The backend thread panicked
    #[error("Backend thread panicked")]
    Panicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackendError::AffinityFailed {
            cpu: 2,
            source: PlatformError::Unsupported {
                operation: "CPU affinity",
            },
        };
        assert_eq!(
            err.to_string(),
            "Failed to set CPU affinity to 2: CPU affinity is not supported on this platform"
        );

        let err = BackendError::InvalidConfig("bad".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad");
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;

        let err = BackendError::ThreadNameFailed {
            name: "x".to_string(),
            source: PlatformError::InvalidThreadName {
                name: "x".to_string(),
                reason: "contains a NUL byte",
            },
        };
        assert!(err.source().is_some());
        assert!(BackendError::Panicked.source().is_none());
    }
}
