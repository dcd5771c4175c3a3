//! Per-source rate limiters.
//!
//! Three variants share one interface. Limiters are single-writer (the
//! source's worker) per the concurrency model; callers hold them behind a
//! mutex and loop on `WaitHint` until granted.

use quarry_protocol::types::{BackoffSchedule, RateLimitParams};
use std::time::Duration;
use tokio::time::Instant;

/// Result of an acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Grant,
    /// Come back after roughly this long.
    WaitHint(Duration),
}

pub trait RateLimiter: Send {
    fn try_acquire(&mut self) -> Acquire;

    /// Feed request outcomes back into the limiter. Default is inert;
    /// the backoff and adaptive variants react.
    fn record_outcome(&mut self, _success: bool) {}

    /// Detection-risk feedback for the adaptive variant.
    fn record_risk(&mut self, _risk: f64) {}
}

/// Construct the limiter a source config asks for.
pub fn build_limiter(params: &RateLimitParams) -> Box<dyn RateLimiter> {
    match params {
        RateLimitParams::TokenWindow { permits, window_ms } => Box::new(TokenWindowLimiter::new(
            *permits,
            Duration::from_millis(*window_ms),
        )),
        RateLimitParams::Backoff {
            schedule,
            base_ms,
            max_ms,
        } => Box::new(BackoffLimiter::new(
            *schedule,
            Duration::from_millis(*base_ms),
            Duration::from_millis(*max_ms),
        )),
        RateLimitParams::Adaptive {
            min_interval_ms,
            max_interval_ms,
        } => Box::new(AdaptiveLimiter::new(
            Duration::from_millis(*min_interval_ms),
            Duration::from_millis(*max_interval_ms),
        )),
    }
}

// ============================================================================
// Token window
// ============================================================================

/// Classical fixed window: `permits` grants per `window`.
#[derive(Debug)]
pub struct TokenWindowLimiter {
    permits: u32,
    window: Duration,
    window_start: Instant,
    used: u32,
}

impl TokenWindowLimiter {
    pub fn new(permits: u32, window: Duration) -> Self {
        Self {
            permits: permits.max(1),
            window,
            window_start: Instant::now(),
            used: 0,
        }
    }
}

impl RateLimiter for TokenWindowLimiter {
    fn try_acquire(&mut self) -> Acquire {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.used = 0;
        }
        if self.used < self.permits {
            self.used += 1;
            return Acquire::Grant;
        }
        let reopens = self.window_start + self.window;
        Acquire::WaitHint(reopens.saturating_duration_since(now))
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Escalating delay schedule on repeated denials; the level resets after a
/// sustained success streak.
#[derive(Debug)]
pub struct BackoffLimiter {
    schedule: BackoffSchedule,
    base: Duration,
    max: Duration,
    level: u32,
    success_streak: u32,
    not_before: Instant,
}

/// Consecutive successes required before the penalty level resets.
const RESET_STREAK: u32 = 5;

impl BackoffLimiter {
    pub fn new(schedule: BackoffSchedule, base: Duration, max: Duration) -> Self {
        Self {
            schedule,
            base,
            max: max.max(base),
            level: 0,
            success_streak: 0,
            not_before: Instant::now(),
        }
    }

    fn interval(&self) -> Duration {
        if self.level == 0 {
            return self.base;
        }
        let multiplier = match self.schedule {
            BackoffSchedule::Exponential => 1u64 << self.level.min(16),
            BackoffSchedule::Linear => u64::from(self.level) + 1,
            BackoffSchedule::Fibonacci => fibonacci(self.level + 1),
        };
        self.base.saturating_mul(multiplier as u32).min(self.max)
    }

    /// Called when the remote denies or throttles a request.
    pub fn escalate(&mut self) {
        self.level = self.level.saturating_add(1);
        self.success_streak = 0;
        self.not_before = Instant::now() + self.interval();
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 1..n.min(40) {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

impl RateLimiter for BackoffLimiter {
    fn try_acquire(&mut self) -> Acquire {
        let now = Instant::now();
        if now < self.not_before {
            return Acquire::WaitHint(self.not_before.duration_since(now));
        }
        self.not_before = now + self.base;
        Acquire::Grant
    }

    fn record_outcome(&mut self, success: bool) {
        if success {
            self.success_streak += 1;
            if self.success_streak >= RESET_STREAK {
                self.level = 0;
                self.success_streak = 0;
            }
        } else {
            self.escalate();
        }
    }
}

// ============================================================================
// Adaptive
// ============================================================================

/// Widens the effective interval when the recent error rate or detection
/// risk is high, narrows it after consecutive clean windows. Bounded by
/// `[min_interval, max_interval]`.
#[derive(Debug)]
pub struct AdaptiveLimiter {
    min_interval: Duration,
    max_interval: Duration,
    interval: Duration,
    not_before: Instant,
    window_requests: u32,
    window_errors: u32,
    clean_windows: u32,
    last_adjust: Instant,
    risk: f64,
}

/// Error-rate above which the interval widens.
const ERROR_RATE_TARGET: f64 = 0.10;
/// Detection-risk above which the interval widens.
const RISK_TARGET: f64 = 0.5;
/// Clean windows required before the interval narrows.
const CLEAN_WINDOWS_TO_RELAX: u32 = 3;
/// Observation window for error-rate accounting.
const ADJUST_WINDOW: Duration = Duration::from_secs(30);

impl AdaptiveLimiter {
    pub fn new(min_interval: Duration, max_interval: Duration) -> Self {
        let max_interval = max_interval.max(min_interval);
        Self {
            min_interval,
            max_interval,
            interval: min_interval,
            not_before: Instant::now(),
            window_requests: 0,
            window_errors: 0,
            clean_windows: 0,
            last_adjust: Instant::now(),
            risk: 0.0,
        }
    }

    fn maybe_adjust(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_adjust) < ADJUST_WINDOW {
            return;
        }
        let error_rate = if self.window_requests == 0 {
            0.0
        } else {
            f64::from(self.window_errors) / f64::from(self.window_requests)
        };

        if error_rate > ERROR_RATE_TARGET || self.risk > RISK_TARGET {
            self.interval = (self.interval * 2).min(self.max_interval);
            self.clean_windows = 0;
        } else {
            self.clean_windows += 1;
            if self.clean_windows >= CLEAN_WINDOWS_TO_RELAX {
                self.interval = (self.interval / 2).max(self.min_interval);
                self.clean_windows = 0;
            }
        }

        self.window_requests = 0;
        self.window_errors = 0;
        self.last_adjust = now;
    }
}

impl RateLimiter for AdaptiveLimiter {
    fn try_acquire(&mut self) -> Acquire {
        self.maybe_adjust();
        let now = Instant::now();
        if now < self.not_before {
            return Acquire::WaitHint(self.not_before.duration_since(now));
        }
        self.not_before = now + self.interval;
        Acquire::Grant
    }

    fn record_outcome(&mut self, success: bool) {
        self.window_requests += 1;
        if !success {
            self.window_errors += 1;
        }
    }

    fn record_risk(&mut self, risk: f64) {
        self.risk = risk.clamp(0.0, 1.0);
    }
}
