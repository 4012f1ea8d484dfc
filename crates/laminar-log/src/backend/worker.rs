//! # Backend Worker
//!
//! Owns the backend thread: starts it at most once, stops it idempotently and
//! runs its bootstrap, main loop and exit drain.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted ──start()──► Running ──stop()──► StopRequested ──join──► Stopped
//!      │                                                                 ▲
//!      └────────────────────────────stop()───────────────────────────────┘
//! ```
//!
//! Only the first `start()` spawns a thread. `stop()` always leaves the worker
//! in `Stopped`, and every record enqueued before it returns has been handed
//! to the handlers.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use super::dispatch::process_next_record;
use super::metrics::BackendMetrics;
use super::platform::{NativePlatform, PlatformAdapter, PlatformError};
use super::BackendError;
use crate::clock::{TimeSource, TscClock};
use crate::config::{BackendConfig, BackendSettings};
use crate::context::{ContextCache, ThreadContextCollection, DEFAULT_QUEUE_CAPACITY};
use crate::handler::HandlerCollection;
use crate::record::Record;

/// Lifecycle state of a [`BackendWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// `start()` has not been called
    NotStarted = 0,
    /// The backend thread was spawned
    Running = 1,
    /// `stop()` is waiting for the thread to exit
    StopRequested = 2,
    /// The thread has exited, or the worker was stopped before starting
    Stopped = 3,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Running,
            2 => Self::StopRequested,
            _ => Self::Stopped,
        }
    }
}

/// The asynchronous log backend.
///
/// Producers register through [`contexts`](Self::contexts) and outputs are
/// attached through [`handlers`](Self::handlers); both work before and after
/// the backend starts.
///
/// ```rust,no_run
/// use laminar_log::backend::BackendWorker;
/// use laminar_log::config::BackendConfig;
/// use laminar_log::handler::StreamHandler;
/// use laminar_log::record::{LogLevel, LogRecord};
/// use std::sync::Arc;
///
/// let worker: BackendWorker<LogRecord> = BackendWorker::new(BackendConfig::default());
/// worker.handlers().add(Arc::new(StreamHandler::stdout()));
/// worker.start().unwrap();
///
/// let producer = worker.contexts().register_current_thread();
/// producer.push(LogRecord::new(LogLevel::Info, "app", "hello")).ok();
///
/// worker.stop().unwrap();
/// ```
pub struct BackendWorker<R: Record> {
    /// Editable until the first `start()`
    config: Mutex<BackendConfig>,
    contexts: Arc<ThreadContextCollection<R>>,
    handlers: Arc<HandlerCollection>,
    platform: Arc<dyn PlatformAdapter>,
    /// `LifecycleState` as u8
    state: AtomicU8,
    /// Cleared by `stop()` or by a failed bootstrap
    is_running: Arc<AtomicBool>,
    /// Thread handle; `stop()` holds this lock while joining
    thread: Mutex<Option<JoinHandle<Result<(), BackendError>>>>,
    metrics: Arc<BackendMetrics>,
}

impl<R: Record> BackendWorker<R> {
    /// Creates a worker for the native platform.
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self::with_platform(config, Arc::new(NativePlatform))
    }

    /// Creates a worker that configures its thread through `platform`.
    #[must_use]
    pub fn with_platform(config: BackendConfig, platform: Arc<dyn PlatformAdapter>) -> Self {
        Self::from_parts(
            config,
            Arc::new(ThreadContextCollection::new(DEFAULT_QUEUE_CAPACITY)),
            Arc::new(HandlerCollection::new()),
            platform,
        )
    }

    /// Creates a worker over existing registries.
    #[must_use]
    pub fn from_parts(
        config: BackendConfig,
        contexts: Arc<ThreadContextCollection<R>>,
        handlers: Arc<HandlerCollection>,
        platform: Arc<dyn PlatformAdapter>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            contexts,
            handlers,
            platform,
            state: AtomicU8::new(LifecycleState::NotStarted as u8),
            is_running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            metrics: Arc::new(BackendMetrics::new()),
        }
    }

    /// Changes the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::AlreadyStarted`] once the worker has left
    /// [`LifecycleState::NotStarted`].
    pub fn configure<F>(&self, f: F) -> Result<(), BackendError>
    where
        F: FnOnce(&mut BackendConfig),
    {
        let mut config = self.config.lock();
        if self.state() != LifecycleState::NotStarted {
            return Err(BackendError::AlreadyStarted);
        }
        f(&mut config);
        Ok(())
    }

    /// Returns a copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> BackendConfig {
        self.config.lock().clone()
    }

    /// Starts the backend thread.
    ///
    /// Only the first call has an effect; later calls return `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidConfig`] if the configuration does not
    /// validate, [`BackendError::ConsumerAttached`] if another worker is
    /// consuming the same producer registry, or [`BackendError::SpawnFailed`]
    /// if the OS refuses to create the thread.
    pub fn start(&self) -> Result<(), BackendError> {
        let settings = {
            let config = self.config.lock();
            config.validate()?;
            if self
                .state
                .compare_exchange(
                    LifecycleState::NotStarted as u8,
                    LifecycleState::Running as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_err()
            {
                tracing::debug!(state = ?self.state(), "Backend already started, ignoring start()");
                return Ok(());
            }
            if !self.contexts.attach_consumer() {
                self.state
                    .store(LifecycleState::NotStarted as u8, Ordering::Release);
                return Err(BackendError::ConsumerAttached);
            }
            config.snapshot()
        };

        self.is_running.store(true, Ordering::Release);

        let thread_name = settings.thread_name().to_string();
        let ctx = BackendThreadContext {
            settings,
            contexts: Arc::clone(&self.contexts),
            handlers: Arc::clone(&self.handlers),
            platform: Arc::clone(&self.platform),
            is_running: Arc::clone(&self.is_running),
            metrics: Arc::clone(&self.metrics),
        };

        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || backend_thread_main(&ctx));

        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                tracing::info!(thread = %thread_name, "Backend worker started");
                Ok(())
            }
            Err(e) => {
                self.is_running.store(false, Ordering::Release);
                self.contexts.detach_consumer();
                self.state
                    .store(LifecycleState::Stopped as u8, Ordering::Release);
                Err(BackendError::SpawnFailed {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stops the backend thread and waits for it to drain every queue.
    ///
    /// Safe to call any number of times. Calling it before `start()` moves
    /// the worker straight to [`LifecycleState::Stopped`], after which
    /// `start()` does nothing. Must not race with `start()`.
    ///
    /// # Errors
    ///
    /// Returns the bootstrap error the thread exited with, or
    /// [`BackendError::Panicked`]. Later calls return `Ok(())`.
    pub fn stop(&self) -> Result<(), BackendError> {
        let mut thread = self.thread.lock();
        self.is_running.store(false, Ordering::Release);

        match self.state.compare_exchange(
            LifecycleState::Running as u8,
            LifecycleState::StopRequested as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) => {
                if LifecycleState::from_u8(current) == LifecycleState::NotStarted {
                    self.state
                        .store(LifecycleState::Stopped as u8, Ordering::Release);
                }
                return Ok(());
            }
        }

        let result = match thread.take() {
            Some(handle) => handle.join().unwrap_or(Err(BackendError::Panicked)),
            None => Ok(()),
        };
        self.contexts.detach_consumer();
        self.state
            .store(LifecycleState::Stopped as u8, Ordering::Release);

        let metrics = self.metrics.snapshot();
        tracing::info!(
            records = metrics.records_processed,
            drained = metrics.drained_records,
            iterations = metrics.iterations,
            "Backend worker stopped"
        );
        result
    }

    /// Returns true while the backend thread should keep running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns the backend metrics.
    #[must_use]
    pub fn metrics(&self) -> &BackendMetrics {
        &self.metrics
    }

    /// Returns the producer registry.
    #[must_use]
    pub fn contexts(&self) -> &Arc<ThreadContextCollection<R>> {
        &self.contexts
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn handlers(&self) -> &Arc<HandlerCollection> {
        &self.handlers
    }
}

impl<R: Record> Default for BackendWorker<R> {
    fn default() -> Self {
        Self::new(BackendConfig::default())
    }
}

impl<R: Record> Drop for BackendWorker<R> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Backend worker exited with error: {e}");
        }
    }
}

impl<R: Record> std::fmt::Debug for BackendWorker<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendWorker")
            .field("state", &self.state())
            .field("is_running", &self.is_running())
            .field("producers", &self.contexts.len())
            .field("handlers", &self.handlers.len())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

/// Everything the backend thread owns.
struct BackendThreadContext<R> {
    settings: BackendSettings,
    contexts: Arc<ThreadContextCollection<R>>,
    handlers: Arc<HandlerCollection>,
    platform: Arc<dyn PlatformAdapter>,
    is_running: Arc<AtomicBool>,
    metrics: Arc<BackendMetrics>,
}

/// Pins and names the thread, then builds the clock.
fn init_backend_thread<R>(
    ctx: &BackendThreadContext<R>,
) -> Result<Option<TscClock>, BackendError> {
    let settings = &ctx.settings;

    if let Some(cpu) = settings.cpu_affinity() {
        ctx.platform
            .set_cpu_affinity(cpu)
            .map_err(|source| BackendError::AffinityFailed { cpu, source })?;
    }

    match ctx.platform.set_thread_name(settings.thread_name()) {
        Ok(()) => {}
        Err(PlatformError::Unsupported { operation }) => {
            tracing::warn!(operation, "OS thread name not set");
        }
        Err(source) => {
            return Err(BackendError::ThreadNameFailed {
                name: settings.thread_name().to_string(),
                source,
            });
        }
    }

    let clock = settings.enable_tsc_clock().then(|| {
        let mut clock = TscClock::new(settings.clock_warmup(), settings.clock_resync_interval());
        clock.calibrate();
        clock
    });
    Ok(clock)
}

/// Main function for the backend thread.
fn backend_thread_main<R: Record>(ctx: &BackendThreadContext<R>) -> Result<(), BackendError> {
    let mut clock = match init_backend_thread(ctx) {
        Ok(clock) => clock,
        Err(e) => {
            tracing::error!("Backend bootstrap failed: {e}");
            ctx.is_running.store(false, Ordering::Release);
            return Err(e);
        }
    };

    let sleep_duration = ctx.settings.sleep_duration();
    let mut cache = ContextCache::new();

    while ctx.is_running.load(Ordering::Relaxed) {
        if let Some(clock) = clock.as_mut() {
            clock.maybe_resync();
        }

        let processed = process_next_record(
            cache.refresh(&ctx.contexts),
            &ctx.handlers,
            clock.as_ref().map(|c| c as &dyn TimeSource),
        );
        ctx.metrics.record_iteration(processed);

        if !processed {
            if sleep_duration.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(sleep_duration);
            }
        }
    }

    // Drain: everything enqueued before stop() must reach the handlers
    while process_next_record(
        cache.refresh(&ctx.contexts),
        &ctx.handlers,
        clock.as_ref().map(|c| c as &dyn TimeSource),
    ) {
        ctx.metrics.record_drained();
    }
    ctx.handlers.flush_all();

    Ok(())
}
