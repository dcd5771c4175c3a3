//! Session brokering: fingerprint rotation plus per-source risk tracking.

use crate::limiter::{build_limiter, RateLimiter};
use crate::profiles::{BehavioralProfile, BrowserProfile, BROWSER_PROFILES};
use crate::proxy::ProxyPool;
use crate::risk::RiskTracker;
use quarry_protocol::types::{SourceConfig, SourceId, StealthParams};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A browsing identity handed to a driver for the duration of a target.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub source_id: SourceId,
    pub profile: BrowserProfile,
    pub behavioral: BehavioralProfile,
    pub proxy: Option<String>,
}

/// One request outcome, reported back by the driver.
#[derive(Debug, Clone, Copy)]
pub struct RequestOutcome {
    pub status: u16,
    pub latency: Duration,
    pub detected_block: bool,
}

struct SourceState {
    params: StealthParams,
    risk: RiskTracker,
    proxies: ProxyPool,
    limiter: Box<dyn RateLimiter>,
    profile_cursor: usize,
    sessions_issued: u64,
}

/// Per-source anti-detection state. Single writer per source (the source's
/// worker); the mutex only serializes the occasional dashboard read.
pub struct SessionBroker {
    sources: Mutex<HashMap<SourceId, SourceState>>,
}

impl Default for SessionBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBroker {
    pub fn new() -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Seed state for a configured source. Idempotent per source id.
    pub fn register_source(&self, config: &SourceConfig) {
        let mut sources = self.sources.lock().expect("session broker lock");
        sources
            .entry(config.source_id.clone())
            .or_insert_with(|| SourceState {
                risk: RiskTracker::new(Duration::from_secs(
                    config.stealth.risk_half_life_secs,
                )),
                proxies: ProxyPool::new(
                    config.stealth.proxies.clone(),
                    config.stealth.proxy_strategy,
                ),
                limiter: build_limiter(&config.rate_limit),
                params: config.stealth.clone(),
                profile_cursor: 0,
                sessions_issued: 0,
            });
    }

    /// Hand out a session with the next fingerprint in the rotation.
    pub fn acquire_session(&self, source_id: &SourceId) -> Session {
        let mut sources = self.sources.lock().expect("session broker lock");
        let state = sources
            .entry(source_id.clone())
            .or_insert_with(|| SourceState {
                risk: RiskTracker::new(Duration::from_secs(
                    quarry_protocol::defaults::DEFAULT_RISK_HALF_LIFE_SECS,
                )),
                proxies: ProxyPool::new(Vec::new(), Default::default()),
                limiter: build_limiter(&Default::default()),
                params: StealthParams::default(),
                profile_cursor: 0,
                sessions_issued: 0,
            });

        let profile = BROWSER_PROFILES[state.profile_cursor % BROWSER_PROFILES.len()];
        state.profile_cursor = state.profile_cursor.wrapping_add(1);
        state.sessions_issued += 1;

        let proxy = state.proxies.pick();
        let session = Session {
            session_id: Uuid::new_v4(),
            source_id: source_id.clone(),
            profile,
            behavioral: BehavioralProfile::new(state.params.min_delay_ms, state.params.max_delay_ms),
            proxy,
        };
        debug!(source = %source_id, session = %session.session_id, "session acquired");
        session
    }

    /// Fold a request outcome into the source's risk score and the proxy's
    /// health record.
    pub fn notify_request_outcome(&self, session: &Session, url: &str, outcome: RequestOutcome) {
        let mut sources = self.sources.lock().expect("session broker lock");
        let Some(state) = sources.get_mut(&session.source_id) else {
            return;
        };
        state.risk.observe(outcome.status, outcome.detected_block);
        let success = !outcome.detected_block && outcome.status < 400;
        state.limiter.record_outcome(success);
        let risk = state.risk.current();
        state.limiter.record_risk(risk);
        if let Some(proxy) = &session.proxy {
            state.proxies.record(proxy, success);
        }
        if outcome.detected_block {
            debug!(
                source = %session.source_id,
                url,
                risk,
                latency_ms = outcome.latency.as_millis() as u64,
                "block observed"
            );
        }
    }

    /// Sampled human-looking delay for this session's behavioral profile.
    pub fn delay_between_actions(&self, session: &Session) -> Duration {
        session.behavioral.sample_delay()
    }

    /// Whether the source must stop issuing requests, and for how long.
    pub fn should_pause_source(&self, source_id: &SourceId) -> (bool, Duration) {
        let mut sources = self.sources.lock().expect("session broker lock");
        let Some(state) = sources.get_mut(source_id) else {
            return (false, Duration::ZERO);
        };
        let threshold = state.params.risk_threshold;
        let cooldown = Duration::from_secs(state.params.cooldown_secs);
        state.risk.should_pause(threshold, cooldown)
    }

    /// Rate-limit acquisition for the source; see [`crate::limiter`].
    pub fn try_acquire_grant(&self, source_id: &SourceId) -> crate::limiter::Acquire {
        let mut sources = self.sources.lock().expect("session broker lock");
        match sources.get_mut(source_id) {
            Some(state) => state.limiter.try_acquire(),
            None => crate::limiter::Acquire::Grant,
        }
    }

    /// Current detection risk for dashboards.
    pub fn current_risk(&self, source_id: &SourceId) -> f64 {
        let sources = self.sources.lock().expect("session broker lock");
        sources.get(source_id).map_or(0.0, |s| s.risk.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::config::seed_sources;

    fn broker_with_seed() -> (SessionBroker, SourceId) {
        let broker = SessionBroker::new();
        let sources = seed_sources();
        for s in &sources {
            broker.register_source(s);
        }
        (broker, sources[0].source_id.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn sessions_rotate_fingerprints() {
        let (broker, source_id) = broker_with_seed();
        let a = broker.acquire_session(&source_id);
        let b = broker.acquire_session(&source_id);
        assert_ne!(a.profile.user_agent, b.profile.user_agent);
        assert_ne!(a.session_id, b.session_id);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_blocks_pause_the_source() {
        let (broker, source_id) = broker_with_seed();
        let session = broker.acquire_session(&source_id);
        for _ in 0..10 {
            broker.notify_request_outcome(
                &session,
                "https://www.quizpages.example/logical-reasoning/1",
                RequestOutcome {
                    status: 429,
                    latency: Duration::from_millis(80),
                    detected_block: true,
                },
            );
        }
        let (paused, cooldown) = broker.should_pause_source(&source_id);
        assert!(paused);
        assert!(cooldown > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn clean_source_is_not_paused() {
        let (broker, source_id) = broker_with_seed();
        let session = broker.acquire_session(&source_id);
        broker.notify_request_outcome(
            &session,
            "https://www.quizpages.example/logical-reasoning/1",
            RequestOutcome {
                status: 200,
                latency: Duration::from_millis(120),
                detected_block: false,
            },
        );
        let (paused, _) = broker.should_pause_source(&source_id);
        assert!(!paused);
    }
}
