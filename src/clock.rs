//! Real-time sources and the simulated clock anchor.
//!
//! The simulator never accumulates per-tick deltas. It keeps the instant the
//! simulation was anchored to real time and recomputes the simulated `now`
//! from elapsed real time on every tick, so a suspended host catches up in a
//! single step.

use arrayvec::ArrayString;
use chrono::{DateTime, FixedOffset, Utc};
use core::fmt::Write;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Calendar day key, `YYYY-MM-DD`.
pub type DayKey = ArrayString<16>;

/// Source of real (wall-clock) time in epoch milliseconds.
pub trait TimeSource {
    fn now_ms(&self) -> i64;
}

/// Host wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually driven clock. Clones share the same instant.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    now_ms: Arc<AtomicI64>,
}

impl ManualTimeSource {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Pairing of a real instant with the simulated instant it maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockAnchor {
    pub real_start_instant: i64,
    pub simulated_start_instant: i64,
}

impl ClockAnchor {
    /// Anchor a fresh simulation at the current real instant.
    pub fn starting_at(real_now_ms: i64) -> Self {
        Self {
            real_start_instant: real_now_ms,
            simulated_start_instant: real_now_ms,
        }
    }

    /// Simulated instant corresponding to `real_now_ms`.
    pub fn simulated_now(&self, real_now_ms: i64) -> i64 {
        let elapsed = real_now_ms.saturating_sub(self.real_start_instant);
        self.simulated_start_instant.saturating_add(elapsed)
    }
}

/// Convert epoch milliseconds to the station's local time.
pub fn local_time(now_ms: i64, timezone: FixedOffset) -> DateTime<FixedOffset> {
    DateTime::<Utc>::from_timestamp_millis(now_ms)
        .unwrap_or_default()
        .with_timezone(&timezone)
}

pub fn day_key(at: &DateTime<FixedOffset>) -> DayKey {
    let mut key = DayKey::new();
    // A four-digit year always fits.
    let _ = write!(key, "{}", at.format("%Y-%m-%d"));
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resync_uses_elapsed_real_time() {
        let anchor = ClockAnchor {
            real_start_instant: 1_000_000,
            simulated_start_instant: 5_000_000,
        };

        assert_eq!(anchor.simulated_now(1_000_000), 5_000_000);
        // A ten minute suspension is recovered in one step.
        assert_eq!(anchor.simulated_now(1_000_000 + 600_000), 5_600_000);
    }

    #[test]
    fn test_manual_time_source_is_shared() {
        let source = ManualTimeSource::new(42);
        let handle = source.clone();
        handle.advance(1000);
        assert_eq!(source.now_ms(), 1042);
        handle.set(7);
        assert_eq!(source.now_ms(), 7);
    }

    #[test]
    fn test_day_key_respects_offset() {
        // 2024-06-15T23:30:00Z
        let now_ms = 1_718_494_200_000;
        let utc = FixedOffset::east_opt(0).unwrap();
        let prague = FixedOffset::east_opt(2 * 3600).unwrap();

        assert_eq!(day_key(&local_time(now_ms, utc)).as_str(), "2024-06-15");
        assert_eq!(day_key(&local_time(now_ms, prague)).as_str(), "2024-06-16");
    }
}
