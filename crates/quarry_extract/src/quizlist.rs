//! Adapter for the paginated quiz-list source (static DOM).
//!
//! Pages carry a list of question blocks with letter-prefixed options and
//! an answer span; pagination follows a next link or numbered query
//! parameter.

use crate::fragment::{confidence, parse_container};
use crate::{hit_rate, ExtractionResult, PageCursor, SourceExtractor};
use async_trait::async_trait;
use chrono::Utc;
use quarry_driver::{Driver, DriverError, ExtractMode, WaitFor};
use quarry_protocol::types::{ExtractionMeta, Pagination, RawQuestion, Target};
use std::time::Instant;
use tracing::{debug, warn};
use url::Url;

pub struct QuizListExtractor;

#[async_trait]
impl SourceExtractor for QuizListExtractor {
    async fn extract_page(
        &self,
        driver: &mut dyn Driver,
        source_id: &quarry_protocol::types::SourceId,
        target: &Target,
        cursor: &PageCursor,
    ) -> Result<ExtractionResult, DriverError> {
        let started = Instant::now();
        let load = driver.goto(&cursor.url, WaitFor::NetworkIdle).await?;
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
            let fields = parse_container(container, &target.selectors, &mut warnings);
            field_hits += fields.field_hits;

            let Some(text) = fields.text else {
                warn!(url = %cursor.url, index, "container without question text");
                continue;
            };
            if fields.options.len() < 2 {
                warnings.push(format!("container {index}: fewer than two options"));
                continue;
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
                    raw_html_snippet: Some(truncate(&container.inner_html, 2_048)),
                },
            });
        }

        let rate = hit_rate(containers.len(), field_hits);
        debug!(
            url = %cursor.url,
            containers = containers.len(),
            records = records.len(),
            hit_rate = rate,
            "quiz page extracted"
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
        match &target.pagination {
            Pagination::None => Ok(None),
            Pagination::NextLink { selector } => {
                let links = driver.query_all(selector).await?;
                let Some(href) = links
                    .iter()
                    .find_map(|l| l.extract(&ExtractMode::Attribute("href".to_string())))
                else {
                    return Ok(None);
                };
                let next_url = resolve_href(&cursor.url, &href);
                match next_url {
                    Some(url) if url != cursor.url => Ok(Some(PageCursor {
                        url,
                        step: cursor.step + 1,
                    })),
                    _ => Ok(None),
                }
            }
            Pagination::Numbered { param, max_pages } => {
                // Page numbers are 1-based; the entry URL is page 1.
                let next_page = cursor.step + 2;
                if next_page > *max_pages {
                    return Ok(None);
                }
                let Ok(mut url) = Url::parse(&target.entry_url) else {
                    return Ok(None);
                };
                let kept: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(k, _)| k != param.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(kept)
                    .append_pair(param, &next_page.to_string());
                Ok(Some(PageCursor {
                    url: url.to_string(),
                    step: cursor.step + 1,
                }))
            }
            Pagination::InfiniteScroll { .. } => {
                // Not a static-DOM pagination mode.
                Ok(None)
            }
        }
    }
}

fn resolve_href(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

fn truncate(html: &str, max: usize) -> String {
    if html.len() <= max {
        return html.to_string();
    }
    html.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_next_links() {
        assert_eq!(
            resolve_href("https://site.example/quiz/logical/1", "/quiz/logical/2").unwrap(),
            "https://site.example/quiz/logical/2"
        );
        assert_eq!(
            resolve_href("https://site.example/quiz/logical/1", "2").unwrap(),
            "https://site.example/quiz/logical/2"
        );
    }

    #[test]
    fn truncate_caps_snippets() {
        let long = "x".repeat(5_000);
        assert_eq!(truncate(&long, 2_048).len(), 2_048);
    }
}
