//! # Exponential backoff for worker restarts.
//!
//! [`BackoffConfig`] describes how retry delays grow; [`BackoffState`] is the
//! per-supervisor mutable part (current interval, consecutive failures, time
//! of the last reset).
//!
//! The delay returned for a failure is the current interval with jitter
//! applied, after which the interval grows by `multiplier`. Growth that would
//! pass `max_interval` (or overflow) is clamped to `max_interval`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use ferrous_runtime::{BackoffConfig, BackoffState};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = BackoffConfig {
//!     initial_interval: Duration::from_millis(100),
//!     multiplier: 2.0,
//!     max_interval: Duration::from_secs(1),
//!     randomization_factor: 0.0,
//! };
//!
//! let mut state = BackoffState::new(config);
//! assert_eq!(state.next_delay(), Duration::from_millis(100));
//! assert_eq!(state.next_delay(), Duration::from_millis(200));
//! assert_eq!(state.next_delay(), Duration::from_millis(400));
//! assert_eq!(state.next_delay(), Duration::from_millis(800));
//! assert_eq!(state.next_delay(), Duration::from_secs(1));
//! # }
//! ```

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_interval: Duration,
    /// Growth factor per failure. Values below `1.0` are treated as `1.0`.
    pub multiplier: f64,
    /// Cap for the interval (and for the jittered delay).
    pub max_interval: Duration,
    /// Jitter: the delay is drawn from `interval × [1 - f, 1 + f]`. `0.0` disables it.
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    /// 500ms initial, ×1.5, capped at 60s, ±50% jitter.
    ///
    /// With jitter, successive delays are not guaranteed to increase: a
    /// drawn delay may be shorter than the one before it. Only the
    /// underlying interval grows monotonically. Use
    /// [`without_jitter`](BackoffConfig::without_jitter) when delays must
    /// strictly increase, e.g. in tests with a paused clock.
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            randomization_factor: 0.5,
        }
    }
}

impl BackoffConfig {
    /// Same delay every time, no jitter.
    pub fn constant(delay: Duration) -> Self {
        Self {
            initial_interval: delay,
            multiplier: 1.0,
            max_interval: delay,
            randomization_factor: 0.0,
        }
    }

    /// Returns a copy with jitter disabled.
    pub fn without_jitter(mut self) -> Self {
        self.randomization_factor = 0.0;
        self
    }

    fn multiplier(&self) -> f64 {
        if self.multiplier.is_finite() && self.multiplier >= 1.0 {
            self.multiplier
        } else {
            1.0
        }
    }

    fn randomization(&self) -> f64 {
        if self.randomization_factor.is_finite() && self.randomization_factor > 0.0 {
            self.randomization_factor.min(1.0)
        } else {
            0.0
        }
    }

    fn initial(&self) -> Duration {
        self.initial_interval.min(self.max_interval)
    }
}

/// Mutable backoff state owned by one supervisor.
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    current_interval: Duration,
    failures: u32,
    last_reset: Instant,
    // Progress undone by the last reset, restored if it proves premature
    failures_before_reset: u32,
    interval_before_reset: Duration,
}

impl BackoffState {
    /// Fresh state at the initial interval.
    pub fn new(config: BackoffConfig) -> Self {
        let initial = config.initial();
        Self {
            current_interval: initial,
            config,
            failures: 0,
            last_reset: Instant::now(),
            failures_before_reset: 0,
            interval_before_reset: initial,
        }
    }

    /// Records one more consecutive failure and returns the new count.
    pub fn record_failure(&mut self) -> u32 {
        self.failures = self.failures.saturating_add(1);
        self.failures
    }

    /// Delay to wait before the next attempt; advances the interval.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current_interval;
        self.current_interval = grow(base, self.config.multiplier(), self.config.max_interval);
        jitter(base, self.config.randomization(), self.config.max_interval)
    }

    /// Back to the initial interval and zero failures.
    pub fn reset(&mut self) {
        self.failures_before_reset = self.failures;
        self.interval_before_reset = self.current_interval;
        self.current_interval = self.config.initial();
        self.failures = 0;
        self.last_reset = Instant::now();
    }

    /// Records a failure of a worker that had started successfully.
    ///
    /// If it failed less than `stable_after` after the last
    /// [`reset`](Self::reset), the reset is undone: the earlier failures count
    /// toward the circuit breaker and the interval keeps growing. Otherwise
    /// this is the first failure of a fresh streak.
    pub fn record_failure_after_start(&mut self, stable_after: Duration) -> u32 {
        if self.last_reset.elapsed() < stable_after {
            self.failures = self.failures_before_reset;
            self.current_interval = self.interval_before_reset;
        }
        self.record_failure()
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Interval the next delay will be based on.
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    /// When [`reset`](Self::reset) last ran (or construction time).
    pub fn last_reset(&self) -> Instant {
        self.last_reset
    }

    /// The configuration this state was built from.
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

fn grow(base: Duration, multiplier: f64, max: Duration) -> Duration {
    let next = base.as_secs_f64() * multiplier;
    if !next.is_finite() || next < 0.0 || next >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(next)
    }
}

fn jitter(base: Duration, factor: f64, max: Duration) -> Duration {
    if factor == 0.0 || base.is_zero() {
        return base.min(max);
    }
    let secs = base.as_secs_f64();
    let low = secs * (1.0 - factor);
    let high = secs * (1.0 + factor);
    let drawn = rand::rng().random_range(low..=high);
    if !drawn.is_finite() || drawn >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(drawn.max(0.0))
    }
}
