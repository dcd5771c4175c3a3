//! Browser fingerprint templates and behavioral pacing.

use rand::Rng;
use std::time::Duration;

/// One fingerprint template: user agent, viewport, locale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserProfile {
    pub user_agent: &'static str,
    pub viewport: (u32, u32),
    pub locale: &'static str,
}

/// Rotation pool. Kept above ten templates so consecutive sessions rarely
/// share a fingerprint.
pub const BROWSER_PROFILES: &[BrowserProfile] = &[
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
        viewport: (1920, 1080),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        viewport: (1440, 900),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        viewport: (1366, 768),
        locale: "en-GB",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
        viewport: (1920, 1080),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:126.0) Gecko/20100101 Firefox/126.0",
        viewport: (1680, 1050),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        viewport: (1512, 982),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.0.0",
        viewport: (1920, 1200),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
        viewport: (2560, 1440),
        locale: "en-GB",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        viewport: (1536, 864),
        locale: "en-IN",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 OPR/111.0.0.0",
        viewport: (1728, 1117),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (X11; Fedora; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        viewport: (1600, 900),
        locale: "en-US",
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; WOW64; rv:124.0) Gecko/20100101 Firefox/124.0",
        viewport: (1280, 1024),
        locale: "en-IN",
    },
];

/// Pacing parameters drawn per session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BehavioralProfile {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Chance of an extra "reading" pause, 0..=1.
    pub long_pause_chance: f64,
    pub long_pause_ms: u64,
}

impl BehavioralProfile {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms,
            max_delay_ms: max_delay_ms.max(min_delay_ms + 1),
            long_pause_chance: 0.08,
            long_pause_ms: 12_000,
        }
    }

    /// Sample a human-looking delay between two actions.
    pub fn sample_delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(self.min_delay_ms..self.max_delay_ms);
        let extra = if rng.gen_bool(self.long_pause_chance) {
            rng.gen_range(0..self.long_pause_ms)
        } else {
            0
        };
        Duration::from_millis(base + extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_enough_templates() {
        assert!(BROWSER_PROFILES.len() >= 10);
    }

    #[test]
    fn sampled_delay_respects_floor() {
        let profile = BehavioralProfile::new(500, 1_000);
        for _ in 0..100 {
            let d = profile.sample_delay();
            assert!(d >= Duration::from_millis(500));
        }
    }
}
