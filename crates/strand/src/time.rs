// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Delays, deadlines and wait outcomes.
//!
//! Delays arrive either as floating-point seconds or as a `Duration`.
//! Zero, negative and NaN delays all mean "as soon as possible".

use std::time::{Duration, Instant};

/// Upper bound for deadlines. Anything further out is treated as this.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A non-negative scheduling delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Delay(Duration);

impl Delay {
    pub const ZERO: Delay = Delay(Duration::ZERO);

    /// Convert seconds to a delay. Non-positive or NaN input clamps to
    /// zero, infinite or oversized input clamps to `Duration::MAX`.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !(secs > 0.0) {
            return Self::ZERO;
        }
        Self(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    /// Absolute deadline `self` from now, on the monotonic clock.
    pub fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.0.min(FAR_FUTURE))
            .unwrap_or(now)
    }
}

impl From<f64> for Delay {
    fn from(secs: f64) -> Self {
        Delay::from_secs_f64(secs)
    }
}

impl From<Duration> for Delay {
    fn from(d: Duration) -> Self {
        Delay(d)
    }
}

/// Deadline for a delay given in any accepted form.
pub fn deadline(delay: impl Into<Delay>) -> Instant {
    delay.into().deadline()
}

/// Outcome of a bounded wait.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The awaited condition was reached.
    Success,
    /// The timeout elapsed first. The awaited work is unaffected.
    TimedOut,
}

impl WaitResult {
    pub fn is_success(self) -> bool {
        self == WaitResult::Success
    }

    pub fn is_timed_out(self) -> bool {
        self == WaitResult::TimedOut
    }

    /// Turn the outcome into a `Result` for `?` propagation.
    pub fn into_result(self) -> Result<(), TimedOut> {
        match self {
            WaitResult::Success => Ok(()),
            WaitResult::TimedOut => Err(TimedOut),
        }
    }
}

/// Timeout error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out")]
pub struct TimedOut;
