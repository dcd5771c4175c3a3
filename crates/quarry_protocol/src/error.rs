//! Error taxonomy for the scraping pipeline.
//!
//! Record-level errors never fail a target; target-level errors never fail
//! the job unless the configured fail ratio is exceeded. The mapping from
//! error kind to retriability and process exit code lives here so every
//! crate agrees on it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuarryError {
    /// Connect / reset / timeout on a page fetch. Retried per page policy.
    #[error("transport error: {0}")]
    Transport(String),

    /// CAPTCHA, 429/503 challenge, or redirect to a bot wall.
    #[error("bot wall detected at {url}")]
    BotWall { url: String },

    /// Selectors stopped matching the source's DOM.
    #[error("schema drift on target {target_id}: selector hit rate {hit_rate:.2}")]
    SchemaDrift { target_id: String, hit_rate: f64 },

    /// Page structure present but a field could not be resolved.
    #[error("parse error: {0}")]
    Parse(String),

    /// Record failed quality rules. Not an engine error.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Transient upstream failure in an AI capability.
    #[error("ai unavailable: {0}")]
    AiUnavailable(String),

    /// Document store write / read failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Internal assertion failed. Fatal for the affected job run.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl QuarryError {
    /// Whether the engine's page retry loop should try again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            QuarryError::Transport(_)
                | QuarryError::Storage(_)
                | QuarryError::AiUnavailable(_)
        )
    }

    /// Whether this error is fatal for the whole job run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuarryError::Invariant(_))
    }

    /// Stable machine-readable code for API problem details.
    pub fn code(&self) -> &'static str {
        match self {
            QuarryError::Transport(_) => "transport",
            QuarryError::BotWall { .. } => "bot_wall",
            QuarryError::SchemaDrift { .. } => "schema_drift",
            QuarryError::Parse(_) => "parse",
            QuarryError::Validation(_) => "validation",
            QuarryError::AiUnavailable(_) => "ai_unavailable",
            QuarryError::Storage(_) => "storage",
            QuarryError::Invariant(_) => "invariant",
        }
    }

    /// Process exit code for CLI front-ends:
    /// 0 success, 2 validation, 3 transient, 4 permanent upstream, 5 invariant.
    pub fn exit_code(&self) -> i32 {
        match self {
            QuarryError::Validation(_) => 2,
            QuarryError::Transport(_)
            | QuarryError::BotWall { .. }
            | QuarryError::AiUnavailable(_)
            | QuarryError::Storage(_) => 3,
            QuarryError::SchemaDrift { .. } | QuarryError::Parse(_) => 4,
            QuarryError::Invariant(_) => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_kinds() {
        assert!(QuarryError::Transport("reset".into()).is_retriable());
        assert!(!QuarryError::SchemaDrift {
            target_id: "t1".into(),
            hit_rate: 0.1
        }
        .is_retriable());
        assert!(!QuarryError::Validation("empty".into()).is_retriable());
    }

    #[test]
    fn exit_codes_match_contract() {
        assert_eq!(QuarryError::Validation("x".into()).exit_code(), 2);
        assert_eq!(QuarryError::Transport("x".into()).exit_code(), 3);
        assert_eq!(QuarryError::Parse("x".into()).exit_code(), 4);
        assert_eq!(QuarryError::Invariant("x".into()).exit_code(), 5);
    }
}
