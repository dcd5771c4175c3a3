//! System configuration: TOML file + environment overrides.
//!
//! The config file seeds the source catalog and tunes the engine and
//! monitor. Anything not present falls back to `defaults`.

use crate::defaults;
use crate::types::{
    ExtractionMethod, GateThresholds, Pagination, QualityWeights, RateLimitParams, SelectorSet,
    SourceConfig, SourceId, StealthParams, Target, TimeoutBudget,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuarryConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_addr: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: defaults::DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: defaults::DEFAULT_DB_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub global_concurrency: usize,
    pub grace_window_secs: u64,
    pub fail_ratio: f64,
    pub spill_enabled: bool,
    pub ai_batch_size: usize,
    pub ai_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            global_concurrency: defaults::DEFAULT_GLOBAL_CONCURRENCY,
            grace_window_secs: defaults::DEFAULT_GRACE_WINDOW_SECS,
            fail_ratio: defaults::DEFAULT_FAIL_RATIO,
            spill_enabled: true,
            ai_batch_size: defaults::DEFAULT_AI_BATCH_SIZE,
            ai_queue_capacity: defaults::DEFAULT_AI_QUEUE_CAPACITY,
        }
    }
}

/// Notification channel wiring for alert rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ChannelSettings {
    Log,
    Webhook { url: String },
}

/// Declarative alert rule. The expression syntax is
/// `rate(name[window]) > threshold` or `value(name) > threshold`;
/// parsing lives in the monitor crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleSettings {
    pub name: String,
    pub expr: String,
    pub for_secs: u64,
    pub severity: crate::types::AlertSeverity,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub channels: Vec<ChannelSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub event_ring_capacity: usize,
    #[serde(default)]
    pub alert_rules: Vec<AlertRuleSettings>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            event_ring_capacity: defaults::EVENT_RING_CAPACITY,
            alert_rules: Vec::new(),
        }
    }
}

impl QuarryConfig {
    /// Load from a TOML file, then apply environment overrides
    /// (`QUARRY_BIND_ADDR`, `QUARRY_DB_URL`). A missing path yields the
    /// built-in defaults with the seed sources.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };

        if config.sources.is_empty() {
            config.sources = seed_sources();
        }

        if let Ok(addr) = std::env::var("QUARRY_BIND_ADDR") {
            config.server.bind_addr = addr;
        }
        if let Ok(url) = std::env::var("QUARRY_DB_URL") {
            config.database.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.global_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "engine.global_concurrency must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.engine.fail_ratio) {
            return Err(ConfigError::Invalid(
                "engine.fail_ratio must be within 0..=1".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.source_id.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source id: {}",
                    source.source_id
                )));
            }
            if source.targets.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source {} has no targets",
                    source.source_id
                )));
            }
            if source.thresholds.human_review > source.thresholds.auto_approve {
                return Err(ConfigError::Invalid(format!(
                    "source {}: human_review threshold above auto_approve",
                    source.source_id
                )));
            }
        }
        Ok(())
    }

    /// Case-insensitive catalog lookup.
    pub fn find_source(&self, name: &str) -> Option<&SourceConfig> {
        let wanted = SourceId::new(name);
        self.sources.iter().find(|s| s.source_id == wanted)
    }
}

/// The two built-in sources: a static paginated quiz site and a dynamic
/// infinite-scroll article site.
pub fn seed_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            source_id: SourceId::new("quizpages"),
            display_name: "QuizPages".to_string(),
            method: ExtractionMethod::StaticDom,
            base_url: "https://www.quizpages.example".to_string(),
            targets: vec![
                Target {
                    target_id: "logical".to_string(),
                    category: "logical".to_string(),
                    difficulty: None,
                    entry_url: "https://www.quizpages.example/logical-reasoning/1".to_string(),
                    pagination: Pagination::NextLink {
                        selector: "a.next-page".to_string(),
                    },
                    selectors: quiz_selector_set(),
                    min_expected: 5,
                    max_questions: None,
                },
                Target {
                    target_id: "quantitative".to_string(),
                    category: "quantitative".to_string(),
                    difficulty: None,
                    entry_url: "https://www.quizpages.example/quantitative/1".to_string(),
                    pagination: Pagination::NextLink {
                        selector: "a.next-page".to_string(),
                    },
                    selectors: quiz_selector_set(),
                    min_expected: 5,
                    max_questions: None,
                },
            ],
            rate_limit: RateLimitParams::TokenWindow {
                permits: 10,
                window_ms: 60_000,
            },
            stealth: StealthParams::default(),
            thresholds: GateThresholds::default(),
            quality_weights: QualityWeights::default(),
            timeouts: TimeoutBudget::default(),
            min_question_len: 12,
            max_question_len: 1_200,
            max_concurrency: 1,
            enabled: true,
            reliability: 0.8,
            version: 1,
        },
        SourceConfig {
            source_id: SourceId::new("prepstream"),
            display_name: "PrepStream".to_string(),
            method: ExtractionMethod::DynamicJs,
            base_url: "https://prepstream.example".to_string(),
            targets: vec![Target {
                target_id: "technical".to_string(),
                category: "technical".to_string(),
                difficulty: None,
                entry_url: "https://prepstream.example/interview-questions".to_string(),
                pagination: Pagination::InfiniteScroll {
                    max_steps: 5,
                    pause_ms: 1_500,
                },
                selectors: SelectorSet {
                    question: "article.question-card".to_string(),
                    text: "h2.question-title".to_string(),
                    options: "ul.choices li".to_string(),
                    correct_answer: "div.answer-reveal".to_string(),
                    explanation: Some("div.explanation".to_string()),
                    metadata: HashMap::from([(
                        "code".to_string(),
                        "pre code".to_string(),
                    )]),
                },
                min_expected: 3,
                max_questions: None,
            }],
            rate_limit: RateLimitParams::Adaptive {
                min_interval_ms: 1_000,
                max_interval_ms: 20_000,
            },
            stealth: StealthParams::default(),
            thresholds: GateThresholds::default(),
            quality_weights: QualityWeights::default(),
            timeouts: TimeoutBudget::default(),
            min_question_len: 12,
            max_question_len: 2_000,
            max_concurrency: 2,
            enabled: true,
            reliability: 0.7,
            version: 1,
        },
    ]
}

fn quiz_selector_set() -> SelectorSet {
    SelectorSet {
        question: "div.quiz-question".to_string(),
        text: "p.q-text".to_string(),
        options: "ol.q-options li".to_string(),
        correct_answer: "span.q-answer".to_string(),
        explanation: Some("div.q-explanation".to_string()),
        metadata: HashMap::new(),
    }
}

/// Commented TOML seed written by `quarry init-config`.
pub fn sample_config_toml() -> String {
    let config = QuarryConfig {
        sources: seed_sources(),
        ..Default::default()
    };
    let body = toml::to_string_pretty(&config).unwrap_or_default();
    format!(
        "# Question Quarry configuration.\n\
         # Environment overrides: QUARRY_BIND_ADDR, QUARRY_DB_URL, QUARRY_HOME.\n\n{body}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_seed_sources() {
        let config = QuarryConfig::load(None).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert!(config.find_source("QuizPages").is_some());
        assert!(config.find_source("QUIZPAGES").is_some());
        assert!(config.find_source("nosuch").is_none());
    }

    #[test]
    fn sample_toml_round_trips() {
        let sample = sample_config_toml();
        let parsed: QuarryConfig = toml::from_str(
            sample
                .lines()
                .filter(|l| !l.starts_with('#'))
                .collect::<Vec<_>>()
                .join("\n")
                .as_str(),
        )
        .unwrap();
        assert_eq!(parsed.sources.len(), 2);
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = QuarryConfig {
            sources: seed_sources(),
            ..Default::default()
        };
        config.sources[0].thresholds.auto_approve = 40.0;
        config.sources[0].thresholds.human_review = 60.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_source_ids() {
        let mut config = QuarryConfig {
            sources: seed_sources(),
            ..Default::default()
        };
        let mut dup = config.sources[0].clone();
        dup.display_name = "Shadow".into();
        config.sources.push(dup);
        assert!(config.validate().is_err());
    }
}
