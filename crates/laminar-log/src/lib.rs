//! # `LaminarLog`
//!
//! Asynchronous, low-latency logging backend.
//!
//! Application threads push timestamped records into their own lock-free
//! SPSC queue and return immediately. A single backend thread merges all
//! queues back into one chronologically ordered stream and hands each record
//! to the output handlers.
//!
//! This crate provides:
//! - **Backend**: the worker thread, its lifecycle and the k-way merge
//! - **Queue**: SPSC ring buffer with a peek / commit / abandon API
//! - **Context**: per-producer queues and their registry
//! - **Clock**: hardware timestamp counter and wall-clock conversion
//! - **Handler**: output sinks
//!
//! ## Design Principles
//!
//! 1. **Producers never block** - a full queue hands the record back
//! 2. **No locks on the record path** - registry locks are taken only on change
//! 3. **Ordering by raw ticks** - the calibrated clock is only used for rendering
//! 4. **Nothing lost on shutdown** - `stop()` drains every queue before returning
//!
//! ## Example
//!
//! ```rust
//! use laminar_log::{BackendConfig, BackendWorker, LogLevel, LogRecord, MemoryHandler};
//! use std::sync::Arc;
//!
//! let config = BackendConfig::builder().enable_tsc_clock(false).build().unwrap();
//! let worker: BackendWorker<LogRecord> = BackendWorker::new(config);
//! let memory = Arc::new(MemoryHandler::new());
//! worker.handlers().add(memory.clone());
//!
//! let producer = worker.contexts().register("main");
//! worker.start().unwrap();
//! producer.push(LogRecord::new(LogLevel::Info, "app", "ready")).unwrap();
//! worker.stop().unwrap();
//!
//! assert_eq!(memory.len(), 1);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)] // Selectively allowed in the queue, clock and platform code
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod clock;
pub mod config;
pub mod context;
pub mod handler;
pub mod queue;
pub mod record;

// Re-export key types
pub use backend::{BackendError, BackendWorker, LifecycleState};
pub use config::BackendConfig;
pub use context::{ProducerHandle, ThreadContextCollection};
pub use handler::{Handler, HandlerCollection, MemoryHandler, StreamHandler};
pub use record::{LogLevel, LogRecord, Record};

/// Result type for laminar-log operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for laminar-log
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Backend errors
    #[error("Backend error: {0}")]
    Backend(#[from] backend::BackendError),
}
