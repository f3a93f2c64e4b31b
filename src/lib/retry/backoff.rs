//! Backoff schedule calculation.
//!
//! A [`BackoffSchedule`] is the full list of waits between attempts, computed up
//! front. Its length implies the attempt count: `len + 1`.
//!
//! ```rust
//! use std::time::Duration;
//! use webui_bridge::retry::backoff::compute;
//!
//! let schedule = compute(
//!     Duration::from_millis(1000),
//!     Duration::from_millis(16000),
//!     2.0,
//!     Some(4),
//!     None,
//! );
//! assert_eq!(schedule.attempts(), 5);
//! ```

use std::time::Duration;

/// Upper bound on schedule length when no attempt cap is given.
pub const SAFETY_BOUND: usize = 32;

/// Ordered waits between consecutive attempts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

impl BackoffSchedule {
    /// A schedule with no waits: exactly one attempt.
    pub fn none() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn len(&self) -> usize {
        self.delays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delays.is_empty()
    }

    /// Number of attempts this schedule allows.
    pub fn attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Sum of every delay in the schedule.
    pub fn total(&self) -> Duration {
        self.delays.iter().sum()
    }

    /// Wait after a failed attempt (0-indexed). The last delay repeats when the
    /// attempt index runs past the schedule; an empty schedule never waits.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        match self.delays.len() {
            0 => Duration::ZERO,
            len => self.delays[attempt.min(len - 1)],
        }
    }
}

impl From<Vec<Duration>> for BackoffSchedule {
    fn from(delays: Vec<Duration>) -> Self {
        Self {
            delays: delays.into_iter().filter(|d| !d.is_zero()).collect(),
        }
    }
}

/// Builder-style parameters for [`compute`].
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// First delay, clamped to `max`.
    pub initial: Duration,
    /// Cap applied to every delay.
    pub max: Duration,
    /// Multiplicative growth between delays.
    pub factor: f64,
    /// Maximum number of delays in the schedule.
    pub max_attempts: Option<usize>,
    /// Budget for the sum of all delays.
    pub max_cumulative: Option<Duration>,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            factor: 2.0,
            max_attempts: None,
            max_cumulative: None,
        }
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn max_cumulative(mut self, budget: Duration) -> Self {
        self.max_cumulative = Some(budget);
        self
    }

    pub fn schedule(&self) -> BackoffSchedule {
        compute(
            self.initial,
            self.max,
            self.factor,
            self.max_attempts,
            self.max_cumulative,
        )
    }
}

/// Computes an exponential delay sequence.
///
/// The first delay is `min(initial, max)`, every following one is
/// `min(previous × factor, max)`. The sequence ends at `max_attempts` entries,
/// or before the entry that would push the running total past
/// `max_cumulative`, whichever comes first. Without an attempt cap the
/// sequence never exceeds [`SAFETY_BOUND`] entries.
///
/// A zero `initial` yields an empty schedule.
pub fn compute(
    initial: Duration,
    max: Duration,
    factor: f64,
    max_attempts: Option<usize>,
    max_cumulative: Option<Duration>,
) -> BackoffSchedule {
    if initial.is_zero() || max.is_zero() {
        return BackoffSchedule::none();
    }

    let cap = max_attempts.unwrap_or(SAFETY_BOUND);
    let mut delays = Vec::with_capacity(cap.min(SAFETY_BOUND));
    let mut total = Duration::ZERO;
    let mut next = initial.min(max);

    while delays.len() < cap {
        if let Some(budget) = max_cumulative
            && total + next > budget
        {
            break;
        }
        total += next;
        delays.push(next);

        next = grow(next, factor, max);
        if next.is_zero() {
            break;
        }
    }

    BackoffSchedule { delays }
}

fn grow(previous: Duration, factor: f64, max: Duration) -> Duration {
    let secs = previous.as_secs_f64() * factor;
    if !secs.is_finite() || secs < 0.0 || secs > max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(secs)
    }
}
