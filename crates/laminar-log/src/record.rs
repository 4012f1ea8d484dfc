//! # Records
//!
//! A [`Record`] is the unit of work a producer enqueues. The backend only
//! needs two things from it: a raw timestamp to order by, and a way to hand
//! itself to the output handlers once it has been selected.

use std::fmt;
use std::sync::Arc;

use crate::clock::{rdtsc, TimeSource};
use crate::handler::{Handler, RenderedRecord};

/// Lazily evaluated accessor for the active handlers.
///
/// Only called while a record is being dispatched.
pub type HandlerAccessor<'a> = &'a dyn Fn() -> Vec<Arc<dyn Handler>>;

/// A pending unit of work in a producer queue.
pub trait Record: Send + 'static {
    /// Raw hardware counter value. Must be non-decreasing across the records
    /// a single producer enqueues.
    fn timestamp(&self) -> u64;

    /// Renders the record and hands it to the handlers.
    ///
    /// `clock` is only for turning [`timestamp`](Self::timestamp) into
    /// wall-clock time; it is `None` when the backend runs without a clock.
    fn backend_process(
        &self,
        thread_id: &str,
        handlers: HandlerAccessor<'_>,
        clock: Option<&dyn TimeSource>,
    );
}

/// Log severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Unrecoverable or unexpected failure
    Error = 0,
    /// Something suspicious
    Warn = 1,
    /// Normal operation
    Info = 2,
    /// Diagnostic detail
    Debug = 3,
    /// Maximum verbosity
    Trace = 4,
}

impl LogLevel {
    /// Returns the upper-case name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RecordKind {
    Message {
        level: LogLevel,
        logger: &'static str,
        message: String,
    },
    Flush,
}

/// The record type produced by the logging front end.
///
/// Either a log line, or a flush marker that flushes every active handler
/// when its turn comes in the merged stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    timestamp: u64,
    kind: RecordKind,
}

impl LogRecord {
    /// Creates a log line stamped with the current counter value.
    #[must_use]
    pub fn new(level: LogLevel, logger: &'static str, message: impl Into<String>) -> Self {
        Self::with_timestamp(rdtsc(), level, logger, message)
    }

    /// Creates a log line with an explicit timestamp.
    #[must_use]
    pub fn with_timestamp(
        timestamp: u64,
        level: LogLevel,
        logger: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind: RecordKind::Message {
                level,
                logger,
                message: message.into(),
            },
        }
    }

    /// Creates a flush marker stamped with the current counter value.
    #[must_use]
    pub fn flush() -> Self {
        Self {
            timestamp: rdtsc(),
            kind: RecordKind::Flush,
        }
    }

    /// Returns true for flush markers.
    #[must_use]
    pub fn is_flush(&self) -> bool {
        matches!(self.kind, RecordKind::Flush)
    }

    /// Returns the message text, if this is a log line.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match &self.kind {
            RecordKind::Message { message, .. } => Some(message),
            RecordKind::Flush => None,
        }
    }
}

impl Record for LogRecord {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }

    fn backend_process(
        &self,
        thread_id: &str,
        handlers: HandlerAccessor<'_>,
        clock: Option<&dyn TimeSource>,
    ) {
        match &self.kind {
            RecordKind::Message {
                level,
                logger,
                message,
            } => {
                let rendered = RenderedRecord {
                    wall_time_ns: clock.map(|c| c.to_wallclock(self.timestamp)),
                    ticks: self.timestamp,
                    thread_id,
                    level: *level,
                    logger,
                    message,
                };
                for handler in handlers() {
                    handler.emit(&rendered);
                }
            }
            RecordKind::Flush => {
                for handler in handlers() {
                    handler.flush();
                }
            }
        }
    }
}
