//! The rule set behind the quality report.

use quarry_protocol::types::{RawQuestion, SourceConfig};

/// Which component a rule contributes to. The discriminant doubles as an
/// array index in the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleComponent {
    Completeness = 0,
    Clarity = 1,
    Accuracy = 2,
    Uniqueness = 3,
}

pub enum Outcome {
    Pass,
    /// Credit a fraction of the weight.
    Partial(f64),
    Fail(&'static str),
}

pub struct Rule {
    pub name: &'static str,
    pub component: RuleComponent,
    pub weight: f64,
    pub check: fn(&RawQuestion, &SourceConfig) -> Outcome,
}

pub fn all_rules() -> &'static [Rule] {
    RULES
}

static RULES: &[Rule] = &[
    Rule {
        name: "question_text_present",
        component: RuleComponent::Completeness,
        weight: 3.0,
        check: |raw, _| {
            if raw.question_text.trim().is_empty() {
                Outcome::Fail("question text is empty")
            } else {
                Outcome::Pass
            }
        },
    },
    Rule {
        name: "question_length_in_bounds",
        component: RuleComponent::Completeness,
        weight: 2.0,
        check: |raw, source| {
            let len = raw.question_text.trim().chars().count();
            if len == 0 {
                Outcome::Fail("no text to measure")
            } else if len < source.min_question_len {
                Outcome::Fail("question shorter than source minimum")
            } else if len > source.max_question_len {
                Outcome::Fail("question longer than source maximum")
            } else {
                Outcome::Pass
            }
        },
    },
    Rule {
        name: "option_count_in_range",
        component: RuleComponent::Completeness,
        weight: 3.0,
        check: |raw, _| {
            let n = raw.options.len();
            if (2..=6).contains(&n) {
                Outcome::Pass
            } else if n == 0 {
                Outcome::Fail("no options extracted")
            } else {
                Outcome::Fail("option count outside 2..=6")
            }
        },
    },
    Rule {
        name: "correct_answer_present",
        component: RuleComponent::Completeness,
        weight: 2.0,
        check: |raw, _| {
            if raw.correct_answer.as_deref().map_or(true, |a| a.trim().is_empty()) {
                Outcome::Fail("no correct answer captured")
            } else {
                Outcome::Pass
            }
        },
    },
    Rule {
        name: "explanation_present",
        component: RuleComponent::Completeness,
        weight: 1.0,
        check: |raw, _| {
            match raw.explanation.as_deref() {
                Some(e) if !e.trim().is_empty() => Outcome::Pass,
                // Missing explanations are common on quiz sites; half credit.
                _ => Outcome::Partial(0.5),
            }
        },
    },
    Rule {
        name: "no_markup_residue",
        component: RuleComponent::Clarity,
        weight: 3.0,
        check: |raw, _| {
            let text = &raw.question_text;
            let has_residue = text.contains('<') && text.contains('>')
                || text.contains("&nbsp;")
                || text.contains("&amp;")
                || text.contains("&#")
                || text.contains("\\u00");
            if has_residue {
                Outcome::Fail("markup or encoding artifacts in text")
            } else {
                Outcome::Pass
            }
        },
    },
    Rule {
        name: "readability_in_bounds",
        component: RuleComponent::Clarity,
        weight: 2.0,
        check: |raw, _| {
            let words: Vec<&str> = raw.question_text.split_whitespace().collect();
            if words.is_empty() {
                return Outcome::Fail("no words to measure");
            }
            let avg_len =
                words.iter().map(|w| w.chars().count()).sum::<usize>() as f64 / words.len() as f64;
            // Natural English questions land well inside these bounds;
            // extraction garbage (token soup, concatenated markup) does not.
            if (2.0..=14.0).contains(&avg_len) && words.len() <= 220 {
                Outcome::Pass
            } else {
                Outcome::Fail("readability heuristic out of bounds")
            }
        },
    },
    Rule {
        name: "reasonable_symbol_ratio",
        component: RuleComponent::Clarity,
        weight: 1.5,
        check: |raw, _| {
            let total = raw.question_text.chars().count().max(1);
            let odd = raw
                .question_text
                .chars()
                .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !".,?!:;()-+/%'\"=^".contains(*c))
                .count();
            if odd as f64 / total as f64 > 0.15 {
                Outcome::Fail("too many unusual symbols")
            } else {
                Outcome::Pass
            }
        },
    },
    Rule {
        name: "interrogative_shape",
        component: RuleComponent::Clarity,
        weight: 1.0,
        check: |raw, _| {
            let text = raw.question_text.trim().to_lowercase();
            let interrogative = text.ends_with('?')
                || text.ends_with(':')
                || ["what", "which", "how", "why", "when", "who", "find", "calculate", "select"]
                    .iter()
                    .any(|w| text.starts_with(w));
            if interrogative {
                Outcome::Pass
            } else {
                Outcome::Partial(0.5)
            }
        },
    },
    Rule {
        name: "answer_resolves_uniquely",
        component: RuleComponent::Accuracy,
        weight: 3.0,
        check: |raw, _| {
            let Some(answer) = raw.correct_answer.as_deref() else {
                return Outcome::Fail("no answer to resolve");
            };
            let needle = normalize(answer);
            let matches = raw
                .options
                .iter()
                .filter(|o| normalize(o) == needle)
                .count();
            match matches {
                1 => Outcome::Pass,
                0 => Outcome::Fail("answer does not match any option"),
                _ => Outcome::Fail("answer matches several options"),
            }
        },
    },
    Rule {
        name: "extraction_confidence",
        component: RuleComponent::Accuracy,
        weight: 2.0,
        check: |raw, _| {
            if raw.meta.confidence >= 0.8 {
                Outcome::Pass
            } else if raw.meta.confidence >= 0.5 {
                Outcome::Partial(0.6)
            } else {
                Outcome::Fail("low extraction confidence")
            }
        },
    },
    Rule {
        name: "category_present",
        component: RuleComponent::Accuracy,
        weight: 1.0,
        check: |raw, source| {
            let known = source
                .targets
                .iter()
                .any(|t| t.target_id == raw.target_id && !t.category.trim().is_empty());
            if known {
                Outcome::Pass
            } else {
                Outcome::Fail("target has no category")
            }
        },
    },
    Rule {
        name: "options_mutually_distinct",
        component: RuleComponent::Uniqueness,
        weight: 3.0,
        check: |raw, _| {
            let mut seen = std::collections::HashSet::new();
            for option in &raw.options {
                if !seen.insert(normalize(option)) {
                    return Outcome::Fail("options repeat after normalization");
                }
            }
            Outcome::Pass
        },
    },
    Rule {
        name: "token_diversity",
        component: RuleComponent::Uniqueness,
        weight: 1.5,
        check: |raw, _| {
            let words: Vec<String> = raw
                .question_text
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect();
            if words.len() < 4 {
                return Outcome::Partial(0.5);
            }
            let distinct: std::collections::HashSet<&String> = words.iter().collect();
            let ratio = distinct.len() as f64 / words.len() as f64;
            if ratio >= 0.5 {
                Outcome::Pass
            } else {
                Outcome::Fail("text repeats itself heavily")
            }
        },
    },
];

/// Whitespace-collapsed, lowercased comparison form.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_set_is_large_enough() {
        assert!(all_rules().len() >= 12, "rule count {}", all_rules().len());
    }

    #[test]
    fn every_component_is_covered() {
        for component in [
            RuleComponent::Completeness,
            RuleComponent::Clarity,
            RuleComponent::Accuracy,
            RuleComponent::Uniqueness,
        ] {
            assert!(
                all_rules().iter().any(|r| r.component == component),
                "no rule for {component:?}"
            );
        }
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize("80  km/h"), normalize("80 km/h"));
    }
}
