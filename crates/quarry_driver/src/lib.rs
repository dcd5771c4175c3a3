//! Interchangeable browser drivers.
//!
//! Two implementations behind one trait: a static-DOM driver (synchronous
//! fetch, no JavaScript) and a dynamic-JS driver (full browser engine for
//! lazy-loading and infinite scroll). Both apply the session's fingerprint,
//! honor kind-specific timeout budgets, and surface bot-wall detection on
//! every page load.

pub mod botwall;
pub mod dynamic_js;
pub mod static_dom;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use dynamic_js::DynamicDriver;
pub use static_dom::StaticDriver;

/// Which timeout budget a deadline overrun charged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Navigation,
    ElementWait,
    ScriptExec,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::Navigation => "navigation",
            TimeoutKind::ElementWait => "element_wait",
            TimeoutKind::ScriptExec => "script_exec",
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("transport failure fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("{kind} timeout after {budget:?}", kind = .kind.as_str())]
    Timeout { kind: TimeoutKind, budget: Duration },

    #[error("invalid selector `{0}`")]
    Selector(String),

    #[error("operation `{0}` is not supported by this driver")]
    Unsupported(&'static str),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    /// Transport and timeout failures are worth a page retry; the rest are not.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            DriverError::Transport { .. } | DriverError::Timeout { .. }
        )
    }
}

/// Outcome of a navigation.
#[derive(Debug, Clone)]
pub struct PageLoadResult {
    pub ok: bool,
    pub status: u16,
    pub bytes: u64,
    pub elapsed: Duration,
    pub final_url: String,
    /// True when the page matches a known bot-wall pattern.
    pub detected_block: bool,
}

/// What to wait for after navigation.
#[derive(Debug, Clone)]
pub enum WaitFor {
    /// A CSS selector to appear.
    Selector(String),
    /// Network to go quiet (dynamic driver; static driver treats it as load).
    NetworkIdle,
    /// A plain delay.
    Timeout(Duration),
}

/// Owned snapshot of a matched element. Materialized eagerly so no DOM
/// handle crosses an await point.
#[derive(Debug, Clone, Default)]
pub struct ElementSnapshot {
    pub text: String,
    pub inner_html: String,
    pub attributes: HashMap<String, String>,
}

/// How to pull a string out of an element.
#[derive(Debug, Clone)]
pub enum ExtractMode {
    Text,
    Attribute(String),
    Html,
}

impl ElementSnapshot {
    /// Extract per mode. Empty results come back as `None`.
    pub fn extract(&self, mode: &ExtractMode) -> Option<String> {
        let value = match mode {
            ExtractMode::Text => self.text.trim().to_string(),
            ExtractMode::Html => self.inner_html.trim().to_string(),
            ExtractMode::Attribute(name) => self.attributes.get(name)?.clone(),
        };
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

/// A started browser driver bound to one session.
#[async_trait]
pub trait Driver: Send {
    /// Navigate and wait per `wait_for`, within the navigation budget.
    async fn goto(&mut self, url: &str, wait_for: WaitFor) -> Result<PageLoadResult, DriverError>;

    /// All elements matching a CSS selector on the current page.
    async fn query_all(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>, DriverError>;

    /// Scroll until the bottom stops moving or `max_steps` is reached.
    /// Returns true if more content kept loading at the last step.
    /// Static driver: `Unsupported`.
    async fn scroll_to_bottom(
        &mut self,
        max_steps: u32,
        pause_between: Duration,
    ) -> Result<bool, DriverError>;

    /// Evaluate a script on the current page. Static driver: `Unsupported`.
    async fn execute_script(&mut self, script: &str) -> Result<serde_json::Value, DriverError>;

    /// PNG screenshot of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, DriverError>;

    /// Release the underlying resources.
    async fn close(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_extract_modes() {
        let mut attributes = HashMap::new();
        attributes.insert("href".to_string(), "/page/2".to_string());
        let snapshot = ElementSnapshot {
            text: "  Next \n".to_string(),
            inner_html: "<b>Next</b>".to_string(),
            attributes,
        };
        assert_eq!(snapshot.extract(&ExtractMode::Text).unwrap(), "Next");
        assert_eq!(snapshot.extract(&ExtractMode::Html).unwrap(), "<b>Next</b>");
        assert_eq!(
            snapshot
                .extract(&ExtractMode::Attribute("href".into()))
                .unwrap(),
            "/page/2"
        );
        assert!(snapshot
            .extract(&ExtractMode::Attribute("title".into()))
            .is_none());
    }

    #[test]
    fn retriable_errors() {
        assert!(DriverError::Transport {
            url: "https://a".into(),
            message: "reset".into()
        }
        .is_retriable());
        assert!(!DriverError::Unsupported("execute_script").is_retriable());
    }
}
