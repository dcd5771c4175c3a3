//! Rule-engine quality scoring and the quality gate.
//!
//! Given a raw question, produce four component scores in [0, 100], a
//! weighted overall score, and a gate verdict against the source's
//! thresholds. Rules are plain functions; a failed rule subtracts its
//! weight from its component and records a reason.

pub mod rules;

use quarry_protocol::types::{GateThresholds, GateVerdict, QualityReport, RawQuestion, SourceConfig};
use rules::{all_rules, RuleComponent};

/// Score a raw question against the full rule set.
pub fn evaluate(raw: &RawQuestion, source: &SourceConfig) -> QualityReport {
    let mut totals = [0.0f64; 4];
    let mut earned = [0.0f64; 4];
    let mut reasons = Vec::new();

    for rule in all_rules() {
        let idx = rule.component as usize;
        totals[idx] += rule.weight;
        let outcome = (rule.check)(raw, source);
        match outcome {
            rules::Outcome::Pass => earned[idx] += rule.weight,
            rules::Outcome::Partial(fraction) => {
                earned[idx] += rule.weight * fraction.clamp(0.0, 1.0);
                reasons.push(format!("{}: partial", rule.name));
            }
            rules::Outcome::Fail(reason) => {
                reasons.push(format!("{}: {}", rule.name, reason));
            }
        }
    }

    let component = |c: RuleComponent| -> f64 {
        let idx = c as usize;
        if totals[idx] == 0.0 {
            100.0
        } else {
            100.0 * earned[idx] / totals[idx]
        }
    };

    let completeness = component(RuleComponent::Completeness);
    let clarity = component(RuleComponent::Clarity);
    let accuracy = component(RuleComponent::Accuracy);
    let uniqueness = component(RuleComponent::Uniqueness);

    let weights = &source.quality_weights;
    let weight_sum =
        weights.completeness + weights.clarity + weights.accuracy + weights.uniqueness;
    let overall = if weight_sum == 0.0 {
        0.0
    } else {
        (completeness * weights.completeness
            + clarity * weights.clarity
            + accuracy * weights.accuracy
            + uniqueness * weights.uniqueness)
            / weight_sum
    };

    QualityReport {
        completeness,
        clarity,
        accuracy,
        uniqueness,
        overall,
        reasons,
    }
}

/// Route a score through the source's gate thresholds.
pub fn gate(score: f64, thresholds: &GateThresholds) -> GateVerdict {
    if score >= thresholds.auto_approve {
        GateVerdict::AutoApprove
    } else if score >= thresholds.human_review {
        GateVerdict::HumanReview
    } else {
        GateVerdict::AutoReject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quarry_protocol::config::seed_sources;
    use quarry_protocol::types::{ExtractionMeta, SourceId};

    fn good_question(source_id: &SourceId) -> RawQuestion {
        RawQuestion {
            id: uuid::Uuid::new_v4(),
            source_id: source_id.clone(),
            target_id: "logical".to_string(),
            question_text:
                "A train travels 60 km in 45 minutes. What is its average speed in km/h?"
                    .to_string(),
            options: vec![
                "70 km/h".to_string(),
                "75 km/h".to_string(),
                "80 km/h".to_string(),
                "90 km/h".to_string(),
            ],
            correct_answer: Some("80 km/h".to_string()),
            explanation: Some("Speed = 60 / 0.75 = 80 km/h.".to_string()),
            meta: ExtractionMeta {
                url: "https://www.quizpages.example/logical-reasoning/1".to_string(),
                dom_path: "div.quiz-question[2]".to_string(),
                extracted_at: Utc::now(),
                confidence: 0.95,
                raw_html_snippet: None,
            },
        }
    }

    #[test]
    fn clean_question_scores_high() {
        let source = &seed_sources()[0];
        let report = evaluate(&good_question(&source.source_id), source);
        assert!(report.overall >= 85.0, "overall {}", report.overall);
        assert!(report.reasons.is_empty(), "reasons: {:?}", report.reasons);
    }

    #[test]
    fn empty_text_tanks_completeness() {
        let source = &seed_sources()[0];
        let mut raw = good_question(&source.source_id);
        raw.question_text = String::new();
        let report = evaluate(&raw, source);
        assert!(report.completeness < 50.0);
        assert!(!report.reasons.is_empty());
    }

    #[test]
    fn unresolvable_answer_hits_accuracy() {
        let source = &seed_sources()[0];
        let mut raw = good_question(&source.source_id);
        raw.correct_answer = Some("85 km/h".to_string());
        let report = evaluate(&raw, source);
        assert!(report.accuracy < 80.0);
    }

    #[test]
    fn duplicate_options_hit_uniqueness() {
        let source = &seed_sources()[0];
        let mut raw = good_question(&source.source_id);
        raw.options = vec![
            "80 km/h".to_string(),
            "80  km/h".to_string(),
            "90 km/h".to_string(),
        ];
        raw.correct_answer = Some("90 km/h".to_string());
        let report = evaluate(&raw, source);
        assert!(report.uniqueness < 100.0);
    }

    #[test]
    fn html_residue_hits_clarity() {
        let source = &seed_sources()[0];
        let mut raw = good_question(&source.source_id);
        raw.question_text =
            "A train travels <b>60 km</b> in 45 minutes.&nbsp;What is its speed?".to_string();
        let report = evaluate(&raw, source);
        assert!(report.clarity < 100.0);
    }

    #[test]
    fn gate_respects_thresholds() {
        let thresholds = GateThresholds {
            auto_approve: 75.0,
            human_review: 50.0,
        };
        assert_eq!(gate(80.0, &thresholds), GateVerdict::AutoApprove);
        assert_eq!(gate(75.0, &thresholds), GateVerdict::AutoApprove);
        assert_eq!(gate(60.0, &thresholds), GateVerdict::HumanReview);
        assert_eq!(gate(49.9, &thresholds), GateVerdict::AutoReject);
    }
}
