//! Adapter for the infinite-scroll article source (dynamic JS).
//!
//! Question cards are lazy-loaded as the page scrolls; answers are
//! rendered by script into a reveal block, explanations sit under a
//! heading, and code snippets are captured through the target's metadata
//! selectors and appended to the question text.

use crate::fragment::{confidence, parse_container};
use crate::{hit_rate, ExtractionResult, PageCursor, SourceExtractor};
use async_trait::async_trait;
use chrono::Utc;
use quarry_driver::{Driver, DriverError, PageLoadResult, WaitFor};
use quarry_protocol::types::{ExtractionMeta, Pagination, RawQuestion, SourceId, Target};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
pub struct ArticleExtractor {
    /// (entry url, scroll step) the live driver is currently positioned at.
    /// Lets a resumed target rebuild its scroll frontier on a fresh driver.
    loaded: Mutex<Option<(String, u32)>>,
}

impl ArticleExtractor {
    fn position(&self) -> Option<(String, u32)> {
        self.loaded.lock().expect("extractor position lock").clone()
    }

    fn set_position(&self, url: &str, step: u32) {
        *self.loaded.lock().expect("extractor position lock") = Some((url.to_string(), step));
    }

    fn scroll_pause(target: &Target) -> Duration {
        match target.pagination {
            Pagination::InfiniteScroll { pause_ms, .. } => Duration::from_millis(pause_ms),
            _ => Duration::from_millis(1_000),
        }
    }
}

#[async_trait]
impl SourceExtractor for ArticleExtractor {
    async fn extract_page(
        &self,
        driver: &mut dyn Driver,
        source_id: &SourceId,
        target: &Target,
        cursor: &PageCursor,
    ) -> Result<ExtractionResult, DriverError> {
        let started = Instant::now();

        // Re-establish the frontier when the driver is not already there
        // (fresh driver after a resume, or first page of the target).
        let position = self.position();
        let in_place = position
            .as_ref()
            .is_some_and(|(url, step)| url == &cursor.url && *step >= cursor.step);

        let load = if in_place {
            // The driver is already on the page with the frontier scrolled
            // in (advance just did it); navigating again would drop the
            // lazy-loaded content.
            PageLoadResult {
                ok: true,
                status: 200,
                bytes: 0,
                elapsed: Duration::ZERO,
                final_url: cursor.url.clone(),
                detected_block: false,
            }
        } else {
            let load = driver
                .goto(&cursor.url, WaitFor::Selector(target.selectors.question.clone()))
                .await?;
            if cursor.step > 0 && !load.detected_block {
                driver
                    .scroll_to_bottom(cursor.step, Self::scroll_pause(target))
                    .await?;
            }
            load
        };
        self.set_position(&cursor.url, cursor.step);

        if load.detected_block || !load.ok {
            return Ok(ExtractionResult {
                ok: false,
                records: Vec::new(),
                warnings: vec![format!("page load failed with status {}", load.status)],
                elapsed: started.elapsed(),
                selector_hit_rate: 0.0,
                load,
            });
        }

        let containers = driver.query_all(&target.selectors.question).await?;
        let mut warnings = Vec::new();
        let mut records = Vec::new();
        let mut field_hits = 0usize;

        for (index, container) in containers.iter().enumerate() {
            let mut fields = parse_container(container, &target.selectors, &mut warnings);
            field_hits += fields.field_hits;

            let Some(mut text) = fields.text.take() else {
                continue;
            };
            if fields.options.len() < 2 {
                warnings.push(format!("card {index}: fewer than two options"));
                continue;
            }

            // Code snippets belong to the question statement on this source.
            for (name, capture) in &fields.extras {
                if name == "code" {
                    text.push_str("\n\n");
                    text.push_str(capture);
                }
            }

            records.push(RawQuestion {
                id: uuid::Uuid::new_v4(),
                source_id: source_id.clone(),
                target_id: target.target_id.clone(),
                question_text: text,
                options: fields.options,
                correct_answer: fields.answer,
                explanation: fields.explanation,
                meta: ExtractionMeta {
                    url: load.final_url.clone(),
                    dom_path: format!("{}[{}]", target.selectors.question, index),
                    extracted_at: Utc::now(),
                    confidence: confidence(fields.field_hits),
                    raw_html_snippet: None,
                },
            });
        }

        let rate = hit_rate(containers.len(), field_hits);
        debug!(
            url = %cursor.url,
            step = cursor.step,
            cards = containers.len(),
            records = records.len(),
            hit_rate = rate,
            "article page extracted"
        );

        Ok(ExtractionResult {
            ok: true,
            records,
            warnings,
            elapsed: started.elapsed(),
            selector_hit_rate: rate,
            load,
        })
    }

    async fn advance(
        &self,
        driver: &mut dyn Driver,
        target: &Target,
        cursor: &PageCursor,
    ) -> Result<Option<PageCursor>, DriverError> {
        let Pagination::InfiniteScroll { max_steps, pause_ms } = target.pagination else {
            return Ok(None);
        };
        if cursor.step >= max_steps {
            return Ok(None);
        }

        let more = driver
            .scroll_to_bottom(1, Duration::from_millis(pause_ms))
            .await?;
        if !more {
            return Ok(None);
        }
        self.set_position(&cursor.url, cursor.step + 1);
        Ok(Some(PageCursor {
            url: cursor.url.clone(),
            step: cursor.step + 1,
        }))
    }
}
