//! # Clock
//!
//! Hardware timestamp counter access and tick-to-wall-clock conversion.
//!
//! Producers stamp records with [`rdtsc`], which is far cheaper than a system
//! call. The backend orders records by comparing these raw tick values and
//! never consults a calibrated clock for ordering. A [`TimeSource`] is only
//! used when a record is rendered, to turn its ticks into wall-clock time.
//!
//! ## Portability
//!
//! Cross-thread ordering assumes an invariant, synchronized counter
//! (`constant_tsc` + `nonstop_tsc` on x86_64). On machines where per-core
//! counters drift apart, records from different threads may be merged out of
//! order. This is not detected or corrected here.
//!
//! On targets other than x86_64 the counter falls back to nanoseconds elapsed
//! since a process-wide anchor, which is monotonic and comparable across
//! threads.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Reads the hardware timestamp counter.
#[cfg(target_arch = "x86_64")]
#[inline]
#[must_use]
pub fn rdtsc() -> u64 {
    // SAFETY: RDTSC has no preconditions and is available on every x86_64 CPU.
    #[allow(unsafe_code)]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
}

/// Reads the hardware timestamp counter.
///
/// Fallback: nanoseconds since the first call in this process.
#[cfg(not(target_arch = "x86_64"))]
#[inline]
#[must_use]
pub fn rdtsc() -> u64 {
    use std::sync::OnceLock;

    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(Instant::now);
    u64::try_from(anchor.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Nanoseconds since the UNIX epoch according to the system clock.
#[must_use]
pub fn system_time_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// Converts raw counter ticks into wall-clock time.
pub trait TimeSource: Send {
    /// Measures the counter frequency. May block for a warm-up period.
    fn calibrate(&mut self);

    /// Returns true once [`calibrate`](Self::calibrate) has completed.
    fn is_calibrated(&self) -> bool;

    /// Converts a tick value into nanoseconds since the UNIX epoch.
    ///
    /// Before calibration the result is an estimate.
    fn to_wallclock(&self, ticks: u64) -> u64;
}

/// A [`TimeSource`] backed by the hardware timestamp counter.
///
/// Keeps one (tick, wall-clock) anchor pair and a ticks-to-nanoseconds ratio.
/// The anchor is refreshed by [`resync`](Self::resync) to bound drift between
/// the counter and the system clock.
#[derive(Debug, Clone)]
pub struct TscClock {
    ns_per_tick: f64,
    base_tick: u64,
    base_wall_ns: u64,
    calibrated: bool,
    warmup: Duration,
    resync_interval: Duration,
    /// `resync_interval` expressed in ticks, valid after calibration
    resync_interval_ticks: u64,
}

impl TscClock {
    /// Creates an uncalibrated clock anchored at the current instant.
    ///
    /// Until [`calibrate`](TimeSource::calibrate) runs the clock assumes one
    /// nanosecond per tick.
    #[must_use]
    pub fn new(warmup: Duration, resync_interval: Duration) -> Self {
        let (base_tick, base_wall_ns) = sample_anchor();
        Self {
            ns_per_tick: 1.0,
            base_tick,
            base_wall_ns,
            calibrated: false,
            warmup,
            resync_interval,
            resync_interval_ticks: duration_to_ticks(resync_interval, 1.0),
        }
    }

    /// Returns the measured nanoseconds per tick.
    #[must_use]
    pub fn ns_per_tick(&self) -> f64 {
        self.ns_per_tick
    }

    /// Re-anchors the clock to the current (tick, wall-clock) pair.
    pub fn resync(&mut self) {
        let (base_tick, base_wall_ns) = sample_anchor();
        self.base_tick = base_tick;
        self.base_wall_ns = base_wall_ns;
    }

    /// Resyncs if the configured interval has elapsed since the last anchor.
    ///
    /// Returns true if a resync happened.
    pub fn maybe_resync(&mut self) -> bool {
        if !self.calibrated || self.resync_interval.is_zero() {
            return false;
        }
        if rdtsc().wrapping_sub(self.base_tick) < self.resync_interval_ticks {
            return false;
        }
        self.resync();
        true
    }
}

impl TimeSource for TscClock {
    #[allow(clippy::cast_precision_loss)]
    fn calibrate(&mut self) {
        let start_tick = rdtsc();
        let start = Instant::now();

        while start.elapsed() < self.warmup {
            std::hint::spin_loop();
        }

        let end_tick = rdtsc();
        let elapsed_ns = start.elapsed().as_nanos() as f64;
        let ticks = end_tick.wrapping_sub(start_tick);

        if ticks > 0 && elapsed_ns > 0.0 {
            self.ns_per_tick = elapsed_ns / ticks as f64;
        }
        self.resync_interval_ticks = duration_to_ticks(self.resync_interval, self.ns_per_tick);
        self.calibrated = true;
        self.resync();

        tracing::debug!(
            ns_per_tick = self.ns_per_tick,
            warmup_ms = self.warmup.as_millis(),
            "TSC clock calibrated"
        );
    }

    fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn to_wallclock(&self, ticks: u64) -> u64 {
        let delta_ticks = i128::from(ticks) - i128::from(self.base_tick);
        let delta_ns = (delta_ticks as f64 * self.ns_per_tick) as i128;
        let wall = i128::from(self.base_wall_ns) + delta_ns;
        wall.clamp(0, i128::from(u64::MAX)) as u64
    }
}

fn sample_anchor() -> (u64, u64) {
    let wall = system_time_ns();
    let tick = rdtsc();
    (tick, wall)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn duration_to_ticks(duration: Duration, ns_per_tick: f64) -> u64 {
    if ns_per_tick <= 0.0 {
        return u64::MAX;
    }
    (duration.as_nanos() as f64 / ns_per_tick) as u64
}
