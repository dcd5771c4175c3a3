//! Per-source extractors: translate a target's selector set into raw
//! question records and drive pagination.
//!
//! Adapters own source-specific normalization (letter-prefixed options,
//! explanation headings, code-snippet capture) but never quality scoring.

pub mod articles;
pub(crate) mod fragment;
pub mod normalize;
pub mod quizlist;

use async_trait::async_trait;
use quarry_driver::{Driver, DriverError, PageLoadResult};
use quarry_protocol::types::{ExtractionMethod, RawQuestion, SourceId, Target};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use articles::ArticleExtractor;
pub use quizlist::QuizListExtractor;

/// Where a target's page plan currently stands. Serialized into the
/// persisted target progress so a paused job resumes exactly here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// URL to fetch for this page.
    pub url: String,
    /// Zero-based page / scroll-step index.
    pub step: u32,
}

impl PageCursor {
    pub fn first(target: &Target) -> Self {
        Self {
            url: target.entry_url.clone(),
            step: 0,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Outcome of one page visit.
#[derive(Debug)]
pub struct ExtractionResult {
    pub ok: bool,
    pub records: Vec<RawQuestion>,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
    /// Fraction of expected field selectors that matched; below 0.5 the
    /// source's DOM has likely changed and schema drift must be raised.
    pub selector_hit_rate: f64,
    pub load: PageLoadResult,
}

/// A per-source adapter. One record per question found on the page.
#[async_trait]
pub trait SourceExtractor: Send + Sync {
    /// Visit the cursor's page and pull out every question it holds.
    async fn extract_page(
        &self,
        driver: &mut dyn Driver,
        source_id: &SourceId,
        target: &Target,
        cursor: &PageCursor,
    ) -> Result<ExtractionResult, DriverError>;

    /// Compute the next cursor, or `None` when the plan is exhausted.
    /// Must be called after `extract_page` on the same driver state.
    async fn advance(
        &self,
        driver: &mut dyn Driver,
        target: &Target,
        cursor: &PageCursor,
    ) -> Result<Option<PageCursor>, DriverError>;
}

/// Pick the adapter matching a source's extraction method.
pub fn extractor_for(method: ExtractionMethod) -> Box<dyn SourceExtractor> {
    match method {
        ExtractionMethod::StaticDom => Box::new(QuizListExtractor),
        ExtractionMethod::DynamicJs => Box::new(ArticleExtractor::default()),
    }
}

/// Hit-rate accounting shared by the adapters: each question container is
/// expected to yield text, at least two options, and an answer.
pub(crate) fn hit_rate(containers: usize, field_hits: usize) -> f64 {
    if containers == 0 {
        return 0.0;
    }
    field_hits as f64 / (containers * 3) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_protocol::config::seed_sources;

    #[test]
    fn cursor_round_trips() {
        let target = &seed_sources()[0].targets[0];
        let cursor = PageCursor::first(target);
        let decoded = PageCursor::decode(&cursor.encode()).unwrap();
        assert_eq!(cursor, decoded);
        assert_eq!(decoded.step, 0);
        assert_eq!(decoded.url, target.entry_url);
    }

    #[test]
    fn hit_rate_bounds() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(2, 6), 1.0);
        assert!(hit_rate(4, 5) < 0.5);
    }
}
