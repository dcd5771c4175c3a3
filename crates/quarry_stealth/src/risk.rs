//! Detection-risk scoring.
//!
//! Risk is a bounded score (0..=1) estimating the probability that the
//! remote site has flagged the current traffic. Updates are an EMA over
//! request outcomes with time-based decay toward zero at the configured
//! half-life.

use std::time::Duration;
use tokio::time::Instant;

/// Weight of a single observation against the decayed score.
const OBSERVATION_ALPHA: f64 = 0.3;

/// Per-source (or per-session) risk tracker. Single writer.
#[derive(Debug)]
pub struct RiskTracker {
    score: f64,
    half_life: Duration,
    last_update: Instant,
    paused_until: Option<Instant>,
}

impl RiskTracker {
    pub fn new(half_life: Duration) -> Self {
        Self {
            score: 0.0,
            half_life: half_life.max(Duration::from_secs(1)),
            last_update: Instant::now(),
            paused_until: None,
        }
    }

    fn decayed(&self, now: Instant) -> f64 {
        let dt = now.duration_since(self.last_update).as_secs_f64();
        let half_life = self.half_life.as_secs_f64();
        self.score * 0.5_f64.powf(dt / half_life)
    }

    /// Fold one request outcome into the score.
    pub fn observe(&mut self, status: u16, detected_block: bool) {
        let signal = if detected_block {
            1.0
        } else if status == 429 || status == 503 {
            0.8
        } else if status >= 400 {
            0.4
        } else {
            0.0
        };
        let now = Instant::now();
        let decayed = self.decayed(now);
        self.score = (decayed * (1.0 - OBSERVATION_ALPHA) + signal * OBSERVATION_ALPHA)
            .clamp(0.0, 1.0);
        self.last_update = now;
    }

    /// Current score with decay applied.
    pub fn current(&self) -> f64 {
        self.decayed(Instant::now())
    }

    /// Whether callers must stop issuing requests, and for how long.
    /// Crossing the threshold arms a cooldown; the pause holds until the
    /// cooldown expires even if the score decays below the threshold.
    pub fn should_pause(&mut self, threshold: f64, cooldown: Duration) -> (bool, Duration) {
        let now = Instant::now();
        if let Some(until) = self.paused_until {
            if now < until {
                return (true, until.duration_since(now));
            }
            self.paused_until = None;
        }
        if self.current() > threshold {
            let until = now + cooldown;
            self.paused_until = Some(until);
            return (true, cooldown);
        }
        (false, Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn blocks_drive_risk_up_and_decay_brings_it_down() {
        let mut tracker = RiskTracker::new(Duration::from_secs(60));
        for _ in 0..6 {
            tracker.observe(403, true);
        }
        let peak = tracker.current();
        assert!(peak > 0.7, "peak risk {peak}");

        tokio::time::advance(Duration::from_secs(300)).await;
        let decayed = tracker.current();
        assert!(decayed < peak / 4.0, "decayed risk {decayed}");
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_for_the_full_cooldown() {
        let mut tracker = RiskTracker::new(Duration::from_secs(60));
        for _ in 0..8 {
            tracker.observe(429, true);
        }
        let (paused, cooldown) = tracker.should_pause(0.75, Duration::from_secs(120));
        assert!(paused);
        assert_eq!(cooldown, Duration::from_secs(120));

        tokio::time::advance(Duration::from_secs(60)).await;
        let (still_paused, remaining) = tracker.should_pause(0.75, Duration::from_secs(120));
        assert!(still_paused);
        assert!(remaining <= Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(600)).await;
        let (paused_after, _) = tracker.should_pause(0.75, Duration::from_secs(120));
        assert!(!paused_after);
    }

    #[test]
    fn clean_traffic_keeps_risk_low() {
        let mut tracker = RiskTracker::new(Duration::from_secs(60));
        for _ in 0..50 {
            tracker.observe(200, false);
        }
        assert!(tracker.current() < 0.05);
    }
}
