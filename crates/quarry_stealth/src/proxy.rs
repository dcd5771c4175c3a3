//! Proxy rotation with health-based cooldowns.

use quarry_protocol::defaults::{PROXY_COOLDOWN_BASE_SECS, PROXY_FAILURE_THRESHOLD};
use quarry_protocol::types::ProxyStrategy;
use rand::seq::SliceRandom;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug)]
struct ProxyEntry {
    endpoint: String,
    consecutive_failures: u32,
    /// Doubles each time the proxy goes unhealthy.
    cooldown_level: u32,
    cooled_until: Option<Instant>,
    last_used: Option<Instant>,
    successes: u64,
    failures: u64,
}

impl ProxyEntry {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            consecutive_failures: 0,
            cooldown_level: 0,
            cooled_until: None,
            last_used: None,
            successes: 0,
            failures: 0,
        }
    }

    fn available(&self, now: Instant) -> bool {
        self.cooled_until.map_or(true, |until| now >= until)
    }

    fn health(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            return 1.0;
        }
        self.successes as f64 / total as f64
    }
}

/// Rotating proxy pool. Empty pool means direct connections.
#[derive(Debug)]
pub struct ProxyPool {
    entries: Vec<ProxyEntry>,
    strategy: ProxyStrategy,
    next_round_robin: usize,
}

impl ProxyPool {
    pub fn new(endpoints: Vec<String>, strategy: ProxyStrategy) -> Self {
        Self {
            entries: endpoints.into_iter().map(ProxyEntry::new).collect(),
            strategy,
            next_round_robin: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pick the next proxy endpoint, skipping entries in cooldown.
    /// Returns None when the pool is empty or everything is cooling down.
    pub fn pick(&mut self) -> Option<String> {
        let now = Instant::now();
        let available: Vec<usize> = (0..self.entries.len())
            .filter(|&i| self.entries[i].available(now))
            .collect();
        if available.is_empty() {
            return None;
        }

        let chosen = match self.strategy {
            ProxyStrategy::RoundRobin => {
                let idx = available[self.next_round_robin % available.len()];
                self.next_round_robin = self.next_round_robin.wrapping_add(1);
                idx
            }
            ProxyStrategy::Random => *available
                .choose(&mut rand::thread_rng())
                .expect("non-empty available set"),
            ProxyStrategy::LeastRecentlyUsed => available
                .into_iter()
                .min_by_key(|&i| self.entries[i].last_used)
                .expect("non-empty available set"),
            ProxyStrategy::HealthWeighted => available
                .into_iter()
                .max_by(|&a, &b| {
                    self.entries[a]
                        .health()
                        .total_cmp(&self.entries[b].health())
                })
                .expect("non-empty available set"),
        };

        let entry = &mut self.entries[chosen];
        entry.last_used = Some(now);
        Some(entry.endpoint.clone())
    }

    /// Record a request outcome for `endpoint`. A run of failures (or a
    /// timeout, which callers report as failure) marks the proxy unhealthy
    /// with an exponentially growing cooldown.
    pub fn record(&mut self, endpoint: &str, success: bool) {
        let Some(entry) = self.entries.iter_mut().find(|e| e.endpoint == endpoint) else {
            return;
        };
        if success {
            entry.successes += 1;
            entry.consecutive_failures = 0;
            entry.cooldown_level = 0;
            return;
        }

        entry.failures += 1;
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= PROXY_FAILURE_THRESHOLD {
            let cooldown =
                Duration::from_secs(PROXY_COOLDOWN_BASE_SECS << entry.cooldown_level.min(6));
            entry.cooled_until = Some(Instant::now() + cooldown);
            entry.cooldown_level += 1;
            entry.consecutive_failures = 0;
            warn!(proxy = %entry.endpoint, ?cooldown, "proxy marked unhealthy");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(strategy: ProxyStrategy) -> ProxyPool {
        ProxyPool::new(
            vec![
                "http://p1.example:8080".into(),
                "http://p2.example:8080".into(),
                "http://p3.example:8080".into(),
            ],
            strategy,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn round_robin_cycles_endpoints() {
        let mut pool = pool(ProxyStrategy::RoundRobin);
        let a = pool.pick().unwrap();
        let b = pool.pick().unwrap();
        let c = pool.pick().unwrap();
        let d = pool.pick().unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(a, d);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_put_proxy_into_cooldown() {
        let mut pool = pool(ProxyStrategy::RoundRobin);
        for _ in 0..PROXY_FAILURE_THRESHOLD {
            pool.record("http://p1.example:8080", false);
        }
        for _ in 0..10 {
            let picked = pool.pick().unwrap();
            assert_ne!(picked, "http://p1.example:8080");
        }

        tokio::time::advance(Duration::from_secs(PROXY_COOLDOWN_BASE_SECS + 1)).await;
        let seen: Vec<String> = (0..3).filter_map(|_| pool.pick()).collect();
        assert!(seen.iter().any(|p| p == "http://p1.example:8080"));
    }

    #[tokio::test(start_paused = true)]
    async fn health_weighted_prefers_clean_proxy() {
        let mut pool = pool(ProxyStrategy::HealthWeighted);
        pool.record("http://p1.example:8080", false);
        pool.record("http://p2.example:8080", true);
        pool.record("http://p2.example:8080", true);
        assert_eq!(pool.pick().unwrap(), "http://p2.example:8080");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_pool_returns_none() {
        let mut pool = ProxyPool::new(vec!["http://p1.example:8080".into()], ProxyStrategy::Random);
        for _ in 0..PROXY_FAILURE_THRESHOLD {
            pool.record("http://p1.example:8080", false);
        }
        assert!(pool.pick().is_none());
    }
}
