//! Per-record enrichment pipeline.
//!
//! normalize -> categorize (AI cross-checked against the local classifier)
//! -> embed -> rate -> fuse with the rule score -> gate.

use crate::capabilities::AiCapabilities;
use crate::classify::LocalClassifier;
use quarry_dedup::EmbeddingCache;
use quarry_protocol::defaults::{
    CATEGORY_DISAGREEMENT_MARGIN, DEFAULT_AI_BATCH_SIZE, FUSE_AI_WEIGHT, FUSE_RULE_WEIGHT,
};
use quarry_protocol::idempotency::stable_extract_key;
use quarry_protocol::types::{
    GateVerdict, ProcessedQuestion, QualityReport, RawQuestion, SourceConfig,
};
use quarry_protocol::QuarryError;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub batch_size: usize,
    pub ai_call_timeout: Duration,
    pub rule_weight: f64,
    pub ai_weight: f64,
    pub disagreement_margin: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_AI_BATCH_SIZE,
            ai_call_timeout: Duration::from_secs(45),
            rule_weight: FUSE_RULE_WEIGHT,
            ai_weight: FUSE_AI_WEIGHT,
            disagreement_margin: CATEGORY_DISAGREEMENT_MARGIN,
        }
    }
}

pub struct AiProcessor {
    capabilities: AiCapabilities,
    local: LocalClassifier,
    cache: EmbeddingCache,
    config: ProcessorConfig,
}

impl AiProcessor {
    pub fn new(capabilities: AiCapabilities, config: ProcessorConfig) -> Self {
        Self {
            capabilities,
            local: LocalClassifier,
            cache: EmbeddingCache::default(),
            config,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Enrich a batch. Fail-open: a transient AI error downgrades only the
    /// affected record to human review with cause `ai_unavailable`.
    pub async fn process_batch(
        &mut self,
        batch: Vec<(RawQuestion, QualityReport)>,
        source: &SourceConfig,
    ) -> Vec<ProcessedQuestion> {
        let mut out = Vec::with_capacity(batch.len());
        for (raw, quality) in batch {
            out.push(self.process_one(raw, quality, source).await);
        }
        out
    }

    async fn process_one(
        &mut self,
        raw: RawQuestion,
        quality: QualityReport,
        source: &SourceConfig,
    ) -> ProcessedQuestion {
        let mut notes = Vec::new();
        let mut ai_unavailable = false;

        // 1. Canonical normalization.
        let question_text = canonical_text(&raw.question_text);
        let options: Vec<String> = raw.options.iter().map(|o| canonical_text(o)).collect();
        let correct_index = match resolve_index(raw.correct_answer.as_deref(), &options) {
            Some(index) => index,
            None => {
                notes.push("answer_unresolved".to_string());
                0
            }
        };

        // 2. Category, AI cross-checked against the local classifier.
        let (local_category, local_confidence) = self.local.classify(&question_text);
        let category = match self
            .call_ai(self.capabilities.classifier.classify_category(&question_text))
            .await
        {
            Ok((ai_category, ai_confidence)) => {
                if ai_category != local_category
                    && local_confidence >= self.config.disagreement_margin
                {
                    notes.push(format!(
                        "category_disagreement: ai={ai_category} local={local_category}"
                    ));
                }
                if ai_confidence >= local_confidence {
                    ai_category
                } else {
                    local_category
                }
            }
            Err(e) => {
                warn!(question = %raw.id, "classifier unavailable: {e}");
                ai_unavailable = true;
                if local_confidence > 0.2 {
                    local_category
                } else {
                    target_category(&raw, source)
                }
            }
        };

        // 3. Embedding, cached by text hash.
        let embedding = match self.cache.get(&question_text) {
            Some(vector) => vector,
            None => match self
                .call_ai(self.capabilities.embedder.embed_text(&question_text))
                .await
            {
                Ok(vector) => {
                    self.cache.put(&question_text, vector.clone());
                    vector
                }
                Err(e) => {
                    warn!(question = %raw.id, "embedder unavailable: {e}");
                    ai_unavailable = true;
                    Vec::new()
                }
            },
        };

        // 4. AI rating fused with the rule score.
        let fused_score = match self
            .call_ai(
                self.capabilities
                    .rater
                    .rate_answer(&question_text, &options, correct_index),
            )
            .await
        {
            Ok(ai_score) => {
                self.config.rule_weight * quality.overall
                    + self.config.ai_weight * ai_score.clamp(0.0, 100.0)
            }
            Err(e) => {
                warn!(question = %raw.id, "rater unavailable: {e}");
                ai_unavailable = true;
                quality.overall
            }
        };

        // 5. Gate on the fused score; AI outages and category disputes can
        // only lower an auto-approve to human review, never raise it.
        let mut verdict = quarry_quality::gate(fused_score, &source.thresholds);
        if ai_unavailable {
            notes.push("ai_unavailable".to_string());
        }
        let disputed = notes.iter().any(|n| n.starts_with("category_disagreement"));
        if (ai_unavailable || disputed) && verdict == GateVerdict::AutoApprove {
            verdict = GateVerdict::HumanReview;
        }

        debug!(
            question = %raw.id,
            fused = fused_score,
            verdict = verdict.as_str(),
            "record enriched"
        );

        let extract_key =
            stable_extract_key(raw.source_id.as_str(), &raw.target_id, &question_text);
        let difficulty = source
            .targets
            .iter()
            .find(|t| t.target_id == raw.target_id)
            .and_then(|t| t.difficulty)
            .unwrap_or_default();

        ProcessedQuestion {
            id: raw.id,
            source_id: raw.source_id,
            target_id: raw.target_id,
            question_text,
            options,
            correct_index,
            explanation: raw.explanation.map(|e| canonical_text(&e)),
            category,
            difficulty,
            quality,
            fused_score,
            verdict,
            embedding,
            cluster_id: None,
            reviewer_notes: notes,
            extracted_at: raw.meta.extracted_at,
            extract_key,
        }
    }

    async fn call_ai<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, QuarryError>>,
    ) -> Result<T, QuarryError> {
        tokio::time::timeout(self.config.ai_call_timeout, fut)
            .await
            .map_err(|_| QuarryError::AiUnavailable("call timed out".to_string()))?
    }

    pub fn cache_hit_rate(&self) -> f64 {
        self.cache.hit_rate()
    }
}

/// Canonical whitespace plus residual-markup strip.
fn canonical_text(text: &str) -> String {
    let mut cleaned = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    if cleaned.contains('<') && cleaned.contains('>') {
        cleaned = strip_tags(&cleaned);
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Resolve the extracted answer to exactly one option index.
fn resolve_index(answer: Option<&str>, options: &[String]) -> Option<usize> {
    let answer = answer?.trim();
    if answer.is_empty() {
        return None;
    }
    let needle = answer.to_lowercase();
    let matches: Vec<usize> = options
        .iter()
        .enumerate()
        .filter(|(_, o)| o.trim().to_lowercase() == needle)
        .map(|(i, _)| i)
        .collect();
    if matches.len() == 1 {
        return Some(matches[0]);
    }
    None
}

fn target_category(raw: &RawQuestion, source: &SourceConfig) -> String {
    source
        .targets
        .iter()
        .find(|t| t.target_id == raw.target_id)
        .map(|t| t.category.clone())
        .unwrap_or_else(|| "general".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{
        AnswerRater, CategoryClassifier, GeneratedQuestion, QuestionGenerator, TextEmbedder,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use quarry_protocol::config::seed_sources;
    use quarry_protocol::types::{Difficulty, ExtractionMeta, SourceId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct FakeAi {
        fail: bool,
        embed_calls: AtomicU64,
    }

    impl FakeAi {
        fn working() -> Arc<Self> {
            Arc::new(Self {
                fail: false,
                embed_calls: AtomicU64::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                embed_calls: AtomicU64::new(0),
            })
        }

        fn gate(&self) -> Result<(), QuarryError> {
            if self.fail {
                Err(QuarryError::AiUnavailable("injected".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl QuestionGenerator for FakeAi {
        async fn generate_question(
            &self,
            category: &str,
            difficulty: Difficulty,
        ) -> Result<GeneratedQuestion, QuarryError> {
            self.gate()?;
            Ok(GeneratedQuestion {
                question_text: "generated".to_string(),
                options: vec!["a".to_string(), "b".to_string()],
                correct_index: 0,
                explanation: None,
                category: category.to_string(),
                difficulty,
            })
        }
    }

    #[async_trait]
    impl AnswerRater for FakeAi {
        async fn rate_answer(
            &self,
            _question: &str,
            _options: &[String],
            _correct_index: usize,
        ) -> Result<f64, QuarryError> {
            self.gate()?;
            Ok(90.0)
        }
    }

    #[async_trait]
    impl TextEmbedder for FakeAi {
        async fn embed_text(&self, text: &str) -> Result<Vec<f32>, QuarryError> {
            self.gate()?;
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            let mut v = vec![0.0f32; 8];
            for (i, b) in text.bytes().enumerate() {
                v[i % 8] += f32::from(b) / 255.0;
            }
            Ok(v)
        }
    }

    #[async_trait]
    impl CategoryClassifier for FakeAi {
        async fn classify_category(&self, _text: &str) -> Result<(String, f64), QuarryError> {
            self.gate()?;
            Ok(("quantitative".to_string(), 0.9))
        }
    }

    fn capabilities(ai: Arc<FakeAi>) -> AiCapabilities {
        AiCapabilities {
            generator: ai.clone(),
            rater: ai.clone(),
            embedder: ai.clone(),
            classifier: ai,
        }
    }

    fn raw_question(source_id: &SourceId) -> RawQuestion {
        RawQuestion {
            id: uuid::Uuid::new_v4(),
            source_id: source_id.clone(),
            target_id: "logical".to_string(),
            question_text: "A train travels 60 km in 45 minutes. What is its average speed?"
                .to_string(),
            options: vec!["70 km/h".to_string(), "80 km/h".to_string(), "90 km/h".to_string()],
            correct_answer: Some("80 km/h".to_string()),
            explanation: Some("Speed = distance / time.".to_string()),
            meta: ExtractionMeta {
                url: "https://www.quizpages.example/logical-reasoning/1".to_string(),
                dom_path: "div.quiz-question[0]".to_string(),
                extracted_at: Utc::now(),
                confidence: 0.95,
                raw_html_snippet: None,
            },
        }
    }

    fn high_quality() -> QualityReport {
        QualityReport {
            completeness: 95.0,
            clarity: 95.0,
            accuracy: 95.0,
            uniqueness: 95.0,
            overall: 95.0,
            reasons: Vec::new(),
        }
    }

    #[tokio::test]
    async fn enrichment_fuses_scores_and_approves() {
        let source = &seed_sources()[0];
        let mut processor = AiProcessor::new(capabilities(FakeAi::working()), ProcessorConfig::default());
        let out = processor
            .process_batch(vec![(raw_question(&source.source_id), high_quality())], source)
            .await;

        let record = &out[0];
        // 0.6 * 95 + 0.4 * 90 = 93
        assert!((record.fused_score - 93.0).abs() < 0.01);
        assert_eq!(record.verdict, GateVerdict::AutoApprove);
        assert_eq!(record.correct_index, 1);
        assert_eq!(record.category, "quantitative");
        assert!(!record.embedding.is_empty());
    }

    #[tokio::test]
    async fn ai_outage_fails_open_to_human_review() {
        let source = &seed_sources()[0];
        let mut processor = AiProcessor::new(capabilities(FakeAi::broken()), ProcessorConfig::default());
        let out = processor
            .process_batch(vec![(raw_question(&source.source_id), high_quality())], source)
            .await;

        let record = &out[0];
        assert_eq!(record.verdict, GateVerdict::HumanReview);
        assert!(record.reviewer_notes.iter().any(|n| n == "ai_unavailable"));
        // Rule score carries the gate alone.
        assert!((record.fused_score - 95.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn embedding_cache_prevents_recompute() {
        let source = &seed_sources()[0];
        let ai = FakeAi::working();
        let mut processor = AiProcessor::new(capabilities(ai.clone()), ProcessorConfig::default());

        let q1 = raw_question(&source.source_id);
        let mut q2 = raw_question(&source.source_id);
        q2.question_text = q1.question_text.clone();

        processor
            .process_batch(
                vec![(q1, high_quality()), (q2, high_quality())],
                source,
            )
            .await;
        assert_eq!(ai.embed_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_score_is_rejected() {
        let source = &seed_sources()[0];
        let mut processor = AiProcessor::new(capabilities(FakeAi::working()), ProcessorConfig::default());
        let poor = QualityReport {
            completeness: 20.0,
            clarity: 20.0,
            accuracy: 20.0,
            uniqueness: 20.0,
            overall: 20.0,
            reasons: vec!["thin".to_string()],
        };
        let out = processor
            .process_batch(vec![(raw_question(&source.source_id), poor)], source)
            .await;
        // 0.6 * 20 + 0.4 * 90 = 48 < human_review threshold 50.
        assert_eq!(out[0].verdict, GateVerdict::AutoReject);
    }
}
