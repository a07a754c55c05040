//! Time Source for Expiry
//!
//! Every expiry decision in chronokv is made against a [`Clock`]. Instants are
//! expressed as milliseconds since the Unix epoch so that relative directives
//! (`EX`, `PX`) and absolute ones (`EXAT`, `PXAT`) share one representation.
//!
//! ## Implementations
//!
//! - [`SystemClock`]: reads the wall clock once at construction and then
//!   advances with a monotonic `Instant`. Wall-clock jumps after startup do
//!   not make keys expire early or live forever.
//! - [`ManualClock`]: only moves when told to. Used by tests that need to
//!   cross an expiry boundary without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of "now" in Unix milliseconds.
///
/// Implementations must never go backwards.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Monotonic clock anchored to the wall clock at creation time.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor: Instant,
    anchor_unix_ms: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64;

        Self {
            anchor: Instant::now(),
            anchor_unix_ms,
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
    fn now_ms(&self) -> u64 {
        self.anchor_unix_ms + self.anchor.elapsed().as_millis() as u64
    }
}

/// A clock that only advances when [`ManualClock::advance`] is called.
///
/// # Example
///
/// ```
/// use chronokv::storage::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.now_ms(), 6_000);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jumps to an absolute instant. Ignored if it would move the clock backwards.
    pub fn set(&self, at_ms: u64) {
        self.now_ms.fetch_max(at_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_tracks_wall_clock() {
        let clock = SystemClock::new();
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        let now = clock.now_ms();
        assert!(now.abs_diff(wall) < 1_000);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now_ms() >= first + 5);
    }

    #[test]
    fn test_manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(10_000);
        clock.set(5_000);
        assert_eq!(clock.now_ms(), 10_000);

        clock.set(12_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 12_250);
    }
}
