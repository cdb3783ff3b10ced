//! Keyfall - audio-clock-synchronized note timing and judgment core
//!
//! Core modules:
//! - `sim`: Pure simulation (spawning, positions, judgment, scoring)
//! - `shared`: Lock-free shared layout for publishing frames across threads
//! - `protocol`: Command/event messages between runtime and worker
//! - `worker`: Fixed-period simulation thread
//! - `runtime`: Caller-side facade and audio clock bridge

pub mod error;
pub mod protocol;
pub mod runtime;
pub mod settings;
pub mod shared;
pub mod sim;
pub mod worker;

pub use error::{EngineError, Result};
pub use runtime::{AudioClock, MonotonicClock, Runtime, RuntimeCallbacks};
pub use settings::{PracticeGuide, Settings};

/// Engine configuration constants
pub mod consts {
    /// Worker update period and clock bridge sampling period (milliseconds)
    pub const TICK_INTERVAL_MS: u64 = 4;
    /// Minimum spacing between STATE events (~30 Hz)
    pub const STATE_THROTTLE_MS: u64 = 33;

    /// Playback speed clamp range
    pub const MIN_SPEED: f64 = 0.1;
    pub const MAX_SPEED: f64 = 4.0;

    /// Seconds of approach at 1x speed
    pub const LOOKAHEAD_BASE: f64 = 5.0;
    /// Hit tolerance either side of a note's display time (ms)
    pub const JUDGMENT_WINDOW_MS: f64 = 150.0;
    /// Seconds past display time before an unanswered note can miss
    pub const MISS_GRACE: f64 = 0.5;
    /// Minimum on-screen age (seconds) before a note can miss
    pub const MIN_MISS_AGE: f64 = 2.0;
    /// Extra time a missed note stays on screen at 1x speed
    pub const MISSED_CLEANUP_BASE: f64 = 2.0;
    /// Time past display a judged note stays on screen at 1x speed
    pub const CLEANUP_BASE: f64 = 3.0;
    /// How far behind a seek target notes are recreated
    pub const SEEK_LOOKBACK: f64 = 2.0;

    /// Points per good judgment
    pub const SCORE_PER_GOOD: u64 = 1000;

    /// Note sprite height in pixels (off-screen spawn offset)
    pub const NOTE_HEIGHT: f32 = 20.0;

    /// Shared layout defaults
    pub const DEFAULT_NOTE_CAPACITY: usize = 1024;
    pub const MAX_NOTE_CAPACITY: usize = 65_536;
}

/// Clamp a playback speed into the supported range
#[inline]
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.clamp(consts::MIN_SPEED, consts::MAX_SPEED)
    } else {
        1.0
    }
}

/// Seconds a note is visible before its display time at the given speed
#[inline]
pub fn lookahead_for(speed: f64) -> f64 {
    consts::LOOKAHEAD_BASE / clamp_speed(speed)
}

/// Convert seconds to integer nanoseconds for the shared clock
#[inline]
pub fn secs_to_nanos(secs: f64) -> i64 {
    (secs * 1_000_000_000.0).round() as i64
}

/// Convert shared-clock nanoseconds back to seconds
#[inline]
pub fn nanos_to_secs(nanos: i64) -> f64 {
    nanos as f64 / 1_000_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_speed() {
        assert_eq!(clamp_speed(0.0), consts::MIN_SPEED);
        assert_eq!(clamp_speed(10.0), consts::MAX_SPEED);
        assert_eq!(clamp_speed(1.5), 1.5);
        assert_eq!(clamp_speed(f64::NAN), 1.0);
    }

    #[test]
    fn test_lookahead_scales_inversely() {
        assert!((lookahead_for(1.0) - 5.0).abs() < 1e-12);
        assert!((lookahead_for(2.0) - 2.5).abs() < 1e-12);
        assert!((lookahead_for(100.0) - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_nanos_roundtrip_precision() {
        let t = 123.456_789_012;
        let back = nanos_to_secs(secs_to_nanos(t));
        assert!((back - t).abs() < 1e-9);
        assert_eq!(secs_to_nanos(-1.5), -1_500_000_000);
    }
}
