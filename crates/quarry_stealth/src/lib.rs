//! Anti-detection substrate and per-source rate limiting.
//!
//! Makes a sequence of browser actions look plausibly human: rotates
//! identifying signals (user agent, viewport, locale, proxy), paces
//! requests from a behavioral profile, and tracks a per-source
//! detection-risk score that can pause a source entirely.

pub mod limiter;
pub mod profiles;
pub mod proxy;
pub mod risk;
pub mod session;

pub use limiter::{build_limiter, Acquire, RateLimiter};
pub use profiles::{BehavioralProfile, BrowserProfile, BROWSER_PROFILES};
pub use proxy::ProxyPool;
pub use session::{RequestOutcome, Session, SessionBroker};
