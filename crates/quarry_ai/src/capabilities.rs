//! Capability contracts for the AI vendors.
//!
//! The pipeline consumes these four contracts; which vendor implements
//! them (and how calls are batched, retried, and authenticated) is wired
//! at process startup and is out of scope here.

use async_trait::async_trait;
use quarry_protocol::types::Difficulty;
use quarry_protocol::QuarryError;
use std::sync::Arc;

/// A fresh question authored by the model, for catalog backfill.
#[derive(Debug, Clone)]
pub struct GeneratedQuestion {
    pub question_text: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    pub explanation: Option<String>,
    pub category: String,
    pub difficulty: Difficulty,
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate_question(
        &self,
        category: &str,
        difficulty: Difficulty,
    ) -> Result<GeneratedQuestion, QuarryError>;
}

#[async_trait]
pub trait AnswerRater: Send + Sync {
    /// Quality rating in [0, 100] for a question with its resolved answer.
    async fn rate_answer(
        &self,
        question: &str,
        options: &[String],
        correct_index: usize,
    ) -> Result<f64, QuarryError>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>, QuarryError>;
}

#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    /// Canonical category plus confidence in [0, 1].
    async fn classify_category(&self, text: &str) -> Result<(String, f64), QuarryError>;
}

/// The bundle the processor is constructed with.
#[derive(Clone)]
pub struct AiCapabilities {
    pub generator: Arc<dyn QuestionGenerator>,
    pub rater: Arc<dyn AnswerRater>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub classifier: Arc<dyn CategoryClassifier>,
}
