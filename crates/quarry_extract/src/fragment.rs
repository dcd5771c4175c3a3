//! Shared per-container field parsing.
//!
//! Drivers hand back owned HTML snapshots per question container; the
//! sub-selectors are applied to the fragment here, synchronously, so no
//! parsed DOM crosses an await point.

use crate::normalize;
use quarry_driver::ElementSnapshot;
use quarry_protocol::types::SelectorSet;
use scraper::{Html, Selector};

/// Fields pulled from one question container.
#[derive(Debug, Default)]
pub(crate) struct ParsedFields {
    pub text: Option<String>,
    pub options: Vec<String>,
    pub answer: Option<String>,
    pub explanation: Option<String>,
    /// Extra named captures (code snippets etc.), in selector-set order.
    pub extras: Vec<(String, String)>,
    /// How many of {text, >=2 options, answer} matched.
    pub field_hits: usize,
}

pub(crate) fn parse_container(
    snapshot: &ElementSnapshot,
    selectors: &SelectorSet,
    warnings: &mut Vec<String>,
) -> ParsedFields {
    let fragment = Html::parse_fragment(&snapshot.inner_html);
    let mut fields = ParsedFields::default();

    let select_texts = |fragment: &Html, raw_selector: &str| -> Option<Vec<String>> {
        let selector = Selector::parse(raw_selector).ok()?;
        Some(
            fragment
                .select(&selector)
                .map(|el| normalize::clean_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
                .filter(|t| !t.is_empty())
                .collect(),
        )
    };

    match select_texts(&fragment, &selectors.text) {
        Some(texts) if !texts.is_empty() => {
            fields.text = Some(texts.join(" "));
            fields.field_hits += 1;
        }
        Some(_) => {}
        None => warnings.push(format!("bad selector: {}", selectors.text)),
    }

    match select_texts(&fragment, &selectors.options) {
        Some(options) if options.len() >= 2 => {
            fields.options = normalize::dedupe_options(
                options
                    .iter()
                    .map(|o| normalize::strip_option_prefix(o))
                    .collect(),
            );
            if fields.options.len() >= 2 {
                fields.field_hits += 1;
            }
        }
        Some(options) => fields.options = options,
        None => warnings.push(format!("bad selector: {}", selectors.options)),
    }

    match select_texts(&fragment, &selectors.correct_answer) {
        Some(answers) if !answers.is_empty() => {
            if let Some(answer) = normalize::resolve_answer(&answers[0], &fields.options) {
                fields.answer = Some(answer);
                fields.field_hits += 1;
            }
        }
        Some(_) => {}
        None => warnings.push(format!("bad selector: {}", selectors.correct_answer)),
    }

    if let Some(explanation_selector) = &selectors.explanation {
        if let Some(texts) = select_texts(&fragment, explanation_selector) {
            if !texts.is_empty() {
                fields.explanation = Some(texts.join(" "));
            }
        }
    }

    for (name, raw_selector) in &selectors.metadata {
        if let Some(texts) = select_texts(&fragment, raw_selector) {
            if !texts.is_empty() {
                fields.extras.push((name.clone(), texts.join("\n")));
            }
        }
    }

    fields
}

/// Extraction confidence from field coverage.
pub(crate) fn confidence(field_hits: usize) -> f64 {
    match field_hits {
        3 => 0.95,
        2 => 0.7,
        1 => 0.4,
        _ => 0.1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn selectors() -> SelectorSet {
        SelectorSet {
            question: "div.quiz-question".to_string(),
            text: "p.q-text".to_string(),
            options: "ol.q-options li".to_string(),
            correct_answer: "span.q-answer".to_string(),
            explanation: Some("div.q-explanation".to_string()),
            metadata: HashMap::new(),
        }
    }

    fn snapshot(inner_html: &str) -> ElementSnapshot {
        ElementSnapshot {
            text: String::new(),
            inner_html: inner_html.to_string(),
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn parses_a_full_container() {
        let html = r#"
            <p class="q-text">What comes next: 2, 4, 8, 16?</p>
            <ol class="q-options">
              <li>A) 20</li><li>B) 24</li><li>C) 32</li><li>D) 64</li>
            </ol>
            <span class="q-answer">Answer: C</span>
            <div class="q-explanation">Each term doubles.</div>
        "#;
        let mut warnings = Vec::new();
        let fields = parse_container(&snapshot(html), &selectors(), &mut warnings);
        assert_eq!(fields.field_hits, 3);
        assert_eq!(fields.text.as_deref().unwrap(), "What comes next: 2, 4, 8, 16?");
        assert_eq!(fields.options, vec!["20", "24", "32", "64"]);
        assert_eq!(fields.answer.as_deref().unwrap(), "32");
        assert_eq!(fields.explanation.as_deref().unwrap(), "Each term doubles.");
        assert!(warnings.is_empty());
    }

    #[test]
    fn missing_answer_lowers_hits() {
        let html = r#"
            <p class="q-text">Pick one.</p>
            <ol class="q-options"><li>x</li><li>y</li></ol>
        "#;
        let mut warnings = Vec::new();
        let fields = parse_container(&snapshot(html), &selectors(), &mut warnings);
        assert_eq!(fields.field_hits, 2);
        assert!(fields.answer.is_none());
    }

    #[test]
    fn confidence_tracks_coverage() {
        assert!(confidence(3) > confidence(2));
        assert!(confidence(2) > confidence(0));
    }
}
