//! Clock and time types for pipeline synchronization.
//!
//! This module provides:
//! - [`ClockTime`]: A nanosecond timestamp type (8 bytes, Copy)
//! - [`Clock`]: Trait for time sources
//! - [`SystemClock`]: Monotonic system clock
//! - [`PipelineClock`]: The pipeline's selected clock plus its base time

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

// ============================================================================
// ClockTime
// ============================================================================

/// Time in nanoseconds (8 bytes, Copy).
///
/// Used for buffer timestamps and durations, and for the clock/base-time
/// bookkeeping done on PAUSED→PLAYING.
///
/// # Special Values
///
/// - `ClockTime::ZERO`: Zero time
/// - `ClockTime::NONE`: Invalid/unset time (sentinel value)
/// - `ClockTime::MAX`: Maximum representable time
///
/// # Examples
///
/// ```rust
/// use trellis::clock::ClockTime;
///
/// let t = ClockTime::from_secs(1) + ClockTime::from_millis(500);
/// assert_eq!(t.nanos(), 1_500_000_000);
/// assert_eq!(format!("{}", t), "1.500s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time (one less than NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Invalid/unset time (sentinel value).
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Get as nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Check if this is the NONE sentinel value.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Check if this is a valid time (not NONE).
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Saturating addition. Returns NONE if either operand is NONE.
    #[inline]
    const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_add(rhs.0);
        // Don't overflow into NONE
        if result == u64::MAX {
            Self::MAX
        } else {
            Self(result)
        }
    }

    /// Saturating subtraction. Returns NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(d.as_nanos().min(u128::from(u64::MAX - 1)) as u64)
    }
}

impl From<ClockTime> for Duration {
    #[inline]
    fn from(t: ClockTime) -> Self {
        if t.is_none() {
            Duration::ZERO
        } else {
            Duration::from_nanos(t.0)
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            let ms = (self.0 / 1_000_000) % 1000;
            write!(f, "{}.{:03}s", self.0 / 1_000_000_000, ms)
        }
    }
}

// ============================================================================
// Clock Trait
// ============================================================================

/// A clock that provides the current time.
///
/// Implementations must be monotonic. Elements that own a hardware time
/// reference (audio sinks, capture devices) can hand one to the pipeline
/// through [`ElementImpl::provide_clock`](crate::element::ElementImpl::provide_clock).
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> ClockTime;

    /// Get a human-readable name for the clock.
    fn name(&self) -> &str {
        "unknown"
    }
}

// ============================================================================
// SystemClock
// ============================================================================

/// System monotonic clock.
///
/// Time is relative to when the clock was created.
pub struct SystemClock {
    epoch: Instant,
    name: String,
}

impl SystemClock {
    /// Create a new system clock with the current instant as epoch.
    pub fn new() -> Self {
        Self::with_name("system-monotonic")
    }

    /// Create a system clock with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            epoch: Instant::now(),
            name: name.into(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> ClockTime {
        ClockTime::from(self.epoch.elapsed())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// PipelineClock
// ============================================================================

/// Pipeline timing context.
///
/// Holds the clock selected for the pipeline and the base time, i.e. the
/// clock time at which the pipeline last went to PLAYING.
///
/// - **Clock time**: Absolute time from the clock
/// - **Base time**: Clock time when the pipeline started playing
/// - **Running time**: Clock time - Base time
pub struct PipelineClock {
    clock: RwLock<Arc<dyn Clock>>,
    /// u64::MAX means not started.
    base_time: AtomicU64,
}

impl PipelineClock {
    /// Create a new pipeline clock with the given clock source.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock: RwLock::new(clock),
            base_time: AtomicU64::new(u64::MAX),
        }
    }

    /// Create a pipeline clock using the system monotonic clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }

    /// Replace the underlying clock. Resets the base time.
    pub fn set_clock(&self, clock: Arc<dyn Clock>) {
        *self.clock.write() = clock;
        self.reset();
    }

    /// Start the pipeline clock (set base time to now) and return the base time.
    pub fn start(&self) -> ClockTime {
        let now = self.clock.read().now();
        self.base_time.store(now.0, Ordering::Release);
        now
    }

    /// Reset the pipeline clock (clear base time).
    pub fn reset(&self) {
        self.base_time.store(u64::MAX, Ordering::Release);
    }

    /// Get the base time. Returns `ClockTime::NONE` if not started.
    #[inline]
    pub fn base_time(&self) -> ClockTime {
        ClockTime(self.base_time.load(Ordering::Acquire))
    }

    /// Get a reference to the underlying clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.read().clone()
    }

    /// Get the running time (time since the pipeline started playing).
    ///
    /// Returns `ClockTime::NONE` if not started.
    pub fn running_time(&self) -> ClockTime {
        let base = self.base_time.load(Ordering::Acquire);
        if base == u64::MAX {
            return ClockTime::NONE;
        }
        self.clock.read().now().saturating_sub(ClockTime(base))
    }
}

impl Default for PipelineClock {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for PipelineClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineClock")
            .field("clock", &self.clock.read().name())
            .field("base_time", &self.base_time())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_time_conversions() {
        let t = ClockTime::from_secs(2);
        assert_eq!(t, ClockTime::from_millis(2_000));
        assert_eq!(t.nanos(), 2_000_000_000);
        assert_eq!(Duration::from(t), Duration::from_secs(2));
        assert_eq!(ClockTime::from(Duration::from_millis(3)), ClockTime::from_nanos(3_000_000));
        assert_eq!(Duration::from(ClockTime::NONE), Duration::ZERO);
    }

    #[test]
    fn test_clock_time_none_arithmetic() {
        let t = ClockTime::from_secs(1);
        assert!((t + ClockTime::NONE).is_none());
        assert!((ClockTime::NONE - t).is_none());
        assert_eq!(ClockTime::from_millis(100) - t, ClockTime::ZERO);
        assert_eq!(ClockTime::MAX + t, ClockTime::MAX);
        assert!(ClockTime::ZERO.is_some());
    }

    #[test]
    fn test_clock_time_display() {
        assert_eq!(format!("{}", ClockTime::from_millis(1500)), "1.500s");
        assert_eq!(format!("{}", ClockTime::NONE), "NONE");
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(1));
        assert!(clock.now() > t1);
    }

    #[test]
    fn test_pipeline_clock_lifecycle() {
        let clock = PipelineClock::system();
        assert!(clock.base_time().is_none());
        assert!(clock.running_time().is_none());

        let base = clock.start();
        assert!(base.is_some());
        assert_eq!(clock.base_time(), base);
        assert!(clock.running_time().is_some());

        clock.reset();
        assert!(clock.base_time().is_none());
    }

    #[test]
    fn test_pipeline_clock_replace() {
        let clock = PipelineClock::system();
        clock.start();
        clock.set_clock(Arc::new(SystemClock::with_name("device")));
        assert_eq!(clock.clock().name(), "device");
        assert!(clock.base_time().is_none());
    }
}
