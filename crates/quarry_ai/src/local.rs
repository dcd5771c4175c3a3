//! Deterministic, offline capability implementations.
//!
//! Wired by default so the pipeline runs end-to-end without vendor
//! credentials: a feature-hashed embedder, a heuristic rater, and the
//! keyword classifier. Real vendor capabilities replace this bundle at
//! startup when configured.

use crate::capabilities::{
    AiCapabilities, AnswerRater, CategoryClassifier, GeneratedQuestion, QuestionGenerator,
    TextEmbedder,
};
use crate::classify::LocalClassifier;
use async_trait::async_trait;
use quarry_protocol::types::Difficulty;
use quarry_protocol::QuarryError;
use std::sync::Arc;

/// Embedding width. Small but enough for cosine separation of question
/// texts in one corpus.
const EMBED_DIM: usize = 64;

pub struct LocalAi {
    classifier: LocalClassifier,
}

impl Default for LocalAi {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalAi {
    pub fn new() -> Self {
        Self {
            classifier: LocalClassifier,
        }
    }

    /// The full capability bundle backed by one shared instance.
    pub fn capabilities() -> AiCapabilities {
        let local = Arc::new(LocalAi::new());
        AiCapabilities {
            generator: local.clone(),
            rater: local.clone(),
            embedder: local.clone(),
            classifier: local,
        }
    }
}

/// Character-trigram feature hashing into a fixed-width vector.
/// Identical text embeds identically; near-identical text lands close.
fn hash_embed(text: &str) -> Vec<f32> {
    let normalized: String = text
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let mut vector = vec![0.0f32; EMBED_DIM];
    let bytes: Vec<u8> = normalized.bytes().collect();
    for window in bytes.windows(3) {
        let mut hash: u64 = 1469598103934665603;
        for b in window {
            hash ^= u64::from(*b);
            hash = hash.wrapping_mul(1099511628211);
        }
        vector[(hash % EMBED_DIM as u64) as usize] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl TextEmbedder for LocalAi {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, QuarryError> {
        Ok(hash_embed(text))
    }
}

#[async_trait]
impl AnswerRater for LocalAi {
    async fn rate_answer(
        &self,
        question: &str,
        options: &[String],
        correct_index: usize,
    ) -> Result<f64, QuarryError> {
        // Structural heuristic standing in for a model judgment.
        let mut score: f64 = 55.0;
        let words = question.split_whitespace().count();
        if (8..=80).contains(&words) {
            score += 20.0;
        }
        if (3..=6).contains(&options.len()) {
            score += 15.0;
        }
        if correct_index < options.len() {
            score += 10.0;
        }
        Ok(score.min(100.0))
    }
}

#[async_trait]
impl CategoryClassifier for LocalAi {
    async fn classify_category(&self, text: &str) -> Result<(String, f64), QuarryError> {
        Ok(self.classifier.classify(text))
    }
}

#[async_trait]
impl QuestionGenerator for LocalAi {
    async fn generate_question(
        &self,
        _category: &str,
        _difficulty: Difficulty,
    ) -> Result<GeneratedQuestion, QuarryError> {
        // Authoring new questions needs a real model.
        Err(QuarryError::AiUnavailable(
            "question generation requires a configured vendor capability".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_text_embeds_identically() {
        let ai = LocalAi::new();
        let a = ai.embed_text("What is the next number in 2, 4, 8?").await.unwrap();
        let b = ai.embed_text("What is the next number in 2, 4, 8?").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn similar_text_is_closer_than_unrelated_text() {
        let ai = LocalAi::new();
        let base = ai
            .embed_text("A train travels 60 km in 45 minutes at what speed")
            .await
            .unwrap();
        let near = ai
            .embed_text("A train travels 60 km in 45 minutes at which speed")
            .await
            .unwrap();
        let far = ai
            .embed_text("Select the synonym of abundant from the options")
            .await
            .unwrap();

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&base, &near) > dot(&base, &far));
        assert!(dot(&base, &near) > 0.9);
    }

    #[tokio::test]
    async fn rater_rewards_well_formed_questions() {
        let ai = LocalAi::new();
        let good = ai
            .rate_answer(
                "A train travels 60 km in 45 minutes. What is its average speed?",
                &["70".into(), "80".into(), "90".into(), "100".into()],
                1,
            )
            .await
            .unwrap();
        let bad = ai.rate_answer("?", &[], 3).await.unwrap();
        assert!(good > bad);
        assert!(good >= 90.0);
    }
}
