//! # Output Handlers
//!
//! Handlers receive records after the backend worker has put them into
//! global timestamp order. The [`HandlerCollection`] is the registry the
//! backend consults, lazily, while dispatching a record.

use std::fmt;
use std::io::Write;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::record::LogLevel;

/// A record as seen by handlers: borrowed fields plus the resolved wall-clock
/// time, if a clock was available.
#[derive(Debug, Clone, Copy)]
pub struct RenderedRecord<'a> {
    /// Nanoseconds since the UNIX epoch, if the backend runs a clock
    pub wall_time_ns: Option<u64>,
    /// Raw counter value the record was stamped with
    pub ticks: u64,
    /// Identifier of the producing thread
    pub thread_id: &'a str,
    /// Severity
    pub level: LogLevel,
    /// Logger name
    pub logger: &'a str,
    /// Message text
    pub message: &'a str,
}

impl fmt::Display for RenderedRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.wall_time_ns {
            Some(ns) => write!(f, "{}.{:09}", ns / 1_000_000_000, ns % 1_000_000_000)?,
            None => write!(f, "@{}", self.ticks)?,
        }
        write!(
            f,
            " [{}] {:<5} {} - {}",
            self.thread_id,
            self.level.as_str(),
            self.logger,
            self.message
        )
    }
}

/// An output sink for rendered records.
///
/// Handlers are called only from the backend thread, but are shared with the
/// rest of the program through the [`HandlerCollection`].
pub trait Handler: Send + Sync {
    /// Writes one record.
    fn emit(&self, record: &RenderedRecord<'_>);

    /// Flushes buffered output.
    fn flush(&self) {}
}

/// Registry of active handlers.
#[derive(Default)]
pub struct HandlerCollection {
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
}

impl HandlerCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler. Records dispatched afterwards reach it.
    pub fn add(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().push(handler);
    }

    /// Removes every handler.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Returns the currently active handlers.
    #[must_use]
    pub fn active_handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.handlers.read().clone()
    }

    /// Returns the number of active handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Flushes every active handler.
    pub fn flush_all(&self) {
        for handler in self.active_handlers() {
            handler.flush();
        }
    }
}

impl fmt::Debug for HandlerCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCollection")
            .field("len", &self.len())
            .finish()
    }
}

/// An owned copy of a [`RenderedRecord`], kept by [`MemoryHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    /// Nanoseconds since the UNIX epoch, if resolved
    pub wall_time_ns: Option<u64>,
    /// Raw counter value
    pub ticks: u64,
    /// Producing thread
    pub thread_id: String,
    /// Severity
    pub level: LogLevel,
    /// Logger name
    pub logger: String,
    /// Message text
    pub message: String,
}

impl From<&RenderedRecord<'_>> for CapturedRecord {
    fn from(record: &RenderedRecord<'_>) -> Self {
        Self {
            wall_time_ns: record.wall_time_ns,
            ticks: record.ticks,
            thread_id: record.thread_id.to_string(),
            level: record.level,
            logger: record.logger.to_string(),
            message: record.message.to_string(),
        }
    }
}

/// Keeps every record it receives in memory.
#[derive(Debug, Default)]
pub struct MemoryHandler {
    records: Mutex<Vec<CapturedRecord>>,
    flushes: Mutex<usize>,
}

impl MemoryHandler {
    /// Creates an empty handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything received so far.
    #[must_use]
    pub fn records(&self) -> Vec<CapturedRecord> {
        self.records.lock().clone()
    }

    /// Removes and returns everything received so far.
    pub fn take(&self) -> Vec<CapturedRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Returns the number of records received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns how many times the handler was flushed.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }
}

impl Handler for MemoryHandler {
    fn emit(&self, record: &RenderedRecord<'_>) {
        self.records.lock().push(CapturedRecord::from(record));
    }

    fn flush(&self) {
        *self.flushes.lock() += 1;
    }
}

/// Writes one line per record to an [`io::Write`](std::io::Write) target.
pub struct StreamHandler {
    name: &'static str,
    writer: Mutex<Box<dyn Write + Send>>,
}

impl StreamHandler {
    /// Creates a handler writing to `writer`.
    pub fn new(name: &'static str, writer: Box<dyn Write + Send>) -> Self {
        Self {
            name,
            writer: Mutex::new(writer),
        }
    }

    /// Creates a handler writing to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new("stdout", Box::new(std::io::stdout()))
    }

    /// Creates a handler writing to standard error.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new("stderr", Box::new(std::io::stderr()))
    }
}

impl Handler for StreamHandler {
    fn emit(&self, record: &RenderedRecord<'_>) {
        if let Err(e) = writeln!(self.writer.lock(), "{record}") {
            tracing::warn!(handler = self.name, "failed to write log record: {e}");
        }
    }

    fn flush(&self) {
        if let Err(e) = self.writer.lock().flush() {
            tracing::warn!(handler = self.name, "failed to flush: {e}");
        }
    }
}

impl fmt::Debug for StreamHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
