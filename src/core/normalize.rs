//! Inter-keypress interval normalization.
//!
//! Clients sometimes capture two keypresses with the same (or nearly the
//! same) timestamp. Such intervals are physically implausible, so they are
//! clamped to a floor before any rate is derived from them.

use chrono::{DateTime, Utc};

/// Shortest plausible interval between two distinct keypresses (9 ms).
pub const MIN_KEYPRESS_INTERVAL_SECS: f64 = 0.009;

/// Signed elapsed time between two instants, in seconds, without clamping.
pub fn raw_elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let delta = to - from;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1000.0,
    }
}

/// Elapsed time between two keypresses in seconds, never below the floor.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    clamp_interval(raw_elapsed_secs(from, to))
}

/// Clamp an interval (seconds) to [`MIN_KEYPRESS_INTERVAL_SECS`].
pub fn clamp_interval(secs: f64) -> f64 {
    if secs.is_nan() || secs < MIN_KEYPRESS_INTERVAL_SECS {
        MIN_KEYPRESS_INTERVAL_SECS
    } else {
        secs
    }
}

/// Instantaneous tapping rate (taps per second) for an interval.
///
/// Returns `None` for zero, negative or non-finite intervals so that an
/// unclamped degenerate sample drops out of an aggregate instead of
/// poisoning it.
pub fn tap_rate(secs: f64) -> Option<f64> {
    if secs.is_finite() && secs > 0.0 {
        Some(1.0 / secs)
    } else {
        None
    }
}
