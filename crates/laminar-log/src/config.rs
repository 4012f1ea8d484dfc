//! # Backend Configuration
//!
//! [`BackendConfig`] is owned by the worker and may be changed until the
//! backend starts. At start it is validated and frozen into a
//! [`BackendSettings`] snapshot that moves into the backend thread, so the
//! running thread never observes a configuration change.
//!
//! ```rust
//! use laminar_log::config::BackendConfig;
//! use std::time::Duration;
//!
//! let config = BackendConfig::builder()
//!     .sleep_duration(Duration::from_micros(50))
//!     .thread_name("LogBackend")
//!     .enable_tsc_clock(false)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.backend_thread_cpu_affinity, None);
//! ```

use std::time::Duration;

use crate::backend::BackendError;

/// Raw "no affinity" sentinel used by integer-valued configuration sources.
pub const NO_CPU_AFFINITY: u16 = u16::MAX;

/// Default backoff after an idle iteration.
pub const DEFAULT_SLEEP_DURATION: Duration = Duration::from_micros(100);

/// Default name of the backend thread.
pub const DEFAULT_THREAD_NAME: &str = "LaminarLogBackend";

/// Configuration of the backend worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// How long the backend sleeps after an iteration that found no record
    pub backend_thread_sleep_duration: Duration,
    /// CPU to pin the backend thread to, `None` to leave it unpinned
    pub backend_thread_cpu_affinity: Option<usize>,
    /// OS-visible name of the backend thread
    pub backend_thread_name: String,
    /// Resolve record timestamps to wall-clock time with a calibrated TSC clock
    pub enable_tsc_clock: bool,
    /// How long clock calibration spins at startup
    pub clock_warmup: Duration,
    /// How often the clock re-anchors against the system clock (zero disables)
    pub clock_resync_interval: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            backend_thread_sleep_duration: DEFAULT_SLEEP_DURATION,
            backend_thread_cpu_affinity: None,
            backend_thread_name: DEFAULT_THREAD_NAME.to_string(),
            enable_tsc_clock: true,
            clock_warmup: Duration::from_millis(100),
            clock_resync_interval: Duration::from_millis(500),
        }
    }
}

impl BackendConfig {
    /// Creates a new configuration builder.
    #[must_use]
    pub fn builder() -> BackendConfigBuilder {
        BackendConfigBuilder::default()
    }

    /// Maps a raw CPU index to an affinity setting, treating
    /// [`NO_CPU_AFFINITY`] as unset.
    #[must_use]
    pub fn cpu_affinity_from_raw(raw: u16) -> Option<usize> {
        (raw != NO_CPU_AFFINITY).then_some(usize::from(raw))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread name is empty or contains a NUL byte,
    /// or if the clock is enabled with a zero warm-up.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.backend_thread_name.is_empty() {
            return Err(BackendError::InvalidConfig(
                "backend_thread_name must not be empty".to_string(),
            ));
        }
        if self.backend_thread_name.contains('\0') {
            return Err(BackendError::InvalidConfig(
                "backend_thread_name must not contain NUL".to_string(),
            ));
        }
        if self.enable_tsc_clock && self.clock_warmup.is_zero() {
            return Err(BackendError::InvalidConfig(
                "clock_warmup must be > 0 when the TSC clock is enabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Freezes the configuration for a backend run.
    #[must_use]
    pub fn snapshot(&self) -> BackendSettings {
        BackendSettings {
            sleep_duration: self.backend_thread_sleep_duration,
            cpu_affinity: self.backend_thread_cpu_affinity,
            thread_name: self.backend_thread_name.clone(),
            enable_tsc_clock: self.enable_tsc_clock,
            clock_warmup: self.clock_warmup,
            clock_resync_interval: self.clock_resync_interval,
        }
    }
}

/// Builder for [`BackendConfig`].
#[derive(Debug, Default)]
pub struct BackendConfigBuilder {
    sleep_duration: Option<Duration>,
    cpu_affinity: Option<usize>,
    thread_name: Option<String>,
    enable_tsc_clock: Option<bool>,
    clock_warmup: Option<Duration>,
    clock_resync_interval: Option<Duration>,
}

impl BackendConfigBuilder {
    /// Sets the idle backoff.
    #[must_use]
    pub fn sleep_duration(mut self, duration: Duration) -> Self {
        self.sleep_duration = Some(duration);
        self
    }

    /// Pins the backend thread to `cpu`.
    #[must_use]
    pub fn cpu_affinity(mut self, cpu: usize) -> Self {
        self.cpu_affinity = Some(cpu);
        self
    }

    /// Sets the backend thread name.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = Some(name.into());
        self
    }

    /// Enables or disables wall-clock resolution through the TSC clock.
    #[must_use]
    pub fn enable_tsc_clock(mut self, enabled: bool) -> Self {
        self.enable_tsc_clock = Some(enabled);
        self
    }

    /// Sets the clock calibration warm-up.
    #[must_use]
    pub fn clock_warmup(mut self, warmup: Duration) -> Self {
        self.clock_warmup = Some(warmup);
        self
    }

    /// Sets the clock resync interval.
    #[must_use]
    pub fn clock_resync_interval(mut self, interval: Duration) -> Self {
        self.clock_resync_interval = Some(interval);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> Result<BackendConfig, BackendError> {
        let defaults = BackendConfig::default();
        let config = BackendConfig {
            backend_thread_sleep_duration: self
                .sleep_duration
                .unwrap_or(defaults.backend_thread_sleep_duration),
            backend_thread_cpu_affinity: self.cpu_affinity,
            backend_thread_name: self.thread_name.unwrap_or(defaults.backend_thread_name),
            enable_tsc_clock: self.enable_tsc_clock.unwrap_or(defaults.enable_tsc_clock),
            clock_warmup: self.clock_warmup.unwrap_or(defaults.clock_warmup),
            clock_resync_interval: self
                .clock_resync_interval
                .unwrap_or(defaults.clock_resync_interval),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Immutable configuration of one backend run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    sleep_duration: Duration,
    cpu_affinity: Option<usize>,
    thread_name: String,
    enable_tsc_clock: bool,
    clock_warmup: Duration,
    clock_resync_interval: Duration,
}

impl BackendSettings {
    /// Idle backoff.
    #[must_use]
    pub fn sleep_duration(&self) -> Duration {
        self.sleep_duration
    }

    /// CPU the backend thread is pinned to.
    #[must_use]
    pub fn cpu_affinity(&self) -> Option<usize> {
        self.cpu_affinity
    }

    /// Backend thread name.
    #[must_use]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Whether the TSC clock is used.
    #[must_use]
    pub fn enable_tsc_clock(&self) -> bool {
        self.enable_tsc_clock
    }

    /// Clock calibration warm-up.
    #[must_use]
    pub fn clock_warmup(&self) -> Duration {
        self.clock_warmup
    }

    /// Clock resync interval.
    #[must_use]
    pub fn clock_resync_interval(&self) -> Duration {
        self.clock_resync_interval
    }
}
