//! Bot-wall pattern detection.
//!
//! A page is treated as blocked when the status or body matches a known
//! challenge pattern, or when navigation was redirected to a challenge URL.

use regex::Regex;
use std::sync::OnceLock;

/// Body substrings that only appear on challenge pages.
const BODY_MARKERS: &[&str] = &[
    "captcha",
    "cf-challenge",
    "challenge-platform",
    "are you a robot",
    "unusual traffic",
    "access denied",
    "request blocked",
    "verify you are human",
];

/// URL path fragments used by challenge redirects.
const CHALLENGE_URL_MARKERS: &[&str] = &["/captcha", "/challenge", "/cdn-cgi/", "/blocked"];

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = BODY_MARKERS
            .iter()
            .map(|m| regex::escape(m))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!("(?i)({alternation})")).expect("static bot-wall regex")
    })
}

/// Decide whether a fetched page is a bot wall.
pub fn detect(status: u16, body: &str, final_url: &str) -> bool {
    if status == 429 {
        return true;
    }
    // 503 is only a wall when the body carries a challenge marker; plain
    // maintenance pages are transport errors, not blocks.
    if status == 503 && marker_regex().is_match(body) {
        return true;
    }
    if CHALLENGE_URL_MARKERS
        .iter()
        .any(|m| final_url.to_lowercase().contains(m))
    {
        return true;
    }
    status < 400 && marker_regex().is_match(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_429_is_always_a_wall() {
        assert!(detect(429, "", "https://site.example/x"));
    }

    #[test]
    fn plain_503_is_not_a_wall() {
        assert!(!detect(503, "scheduled maintenance", "https://site.example/x"));
        assert!(detect(
            503,
            "please solve this CAPTCHA to continue",
            "https://site.example/x"
        ));
    }

    #[test]
    fn challenge_redirect_is_a_wall() {
        assert!(detect(
            200,
            "<html></html>",
            "https://site.example/cdn-cgi/challenge"
        ));
    }

    #[test]
    fn marker_in_ok_body_is_a_wall() {
        assert!(detect(
            200,
            "<p>Verify you are human to proceed</p>",
            "https://site.example/quiz/1"
        ));
        assert!(!detect(
            200,
            "<p>What is 2 + 2?</p>",
            "https://site.example/quiz/1"
        ));
    }
}
