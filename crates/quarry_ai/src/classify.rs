//! Local rule-based category classifier.
//!
//! Used as a cross-check against the AI classifier: when the two disagree
//! with enough combined confidence, the record is flagged for review
//! instead of silently trusting either side.

/// Canonical categories and their keyword evidence.
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "quantitative",
        &[
            "percent", "ratio", "average", "speed", "distance", "profit", "interest", "fraction",
            "divisible", "remainder", "sum of", "product of", "km/h", "work done",
        ],
    ),
    (
        "logical",
        &[
            "series", "sequence", "next in", "odd one out", "syllogism", "conclusion", "premise",
            "statement", "assumption", "arrangement", "blood relation", "direction",
        ],
    ),
    (
        "verbal",
        &[
            "synonym", "antonym", "passage", "grammar", "sentence", "idiom", "meaning of",
            "fill in the blank", "spelling", "comprehension",
        ],
    ),
    (
        "technical",
        &[
            "function", "array", "pointer", "complexity", "algorithm", "compile", "runtime",
            "database", "query", "class", "object", "thread", "output of", "code",
        ],
    ),
];

/// Classifier over the keyword table. Confidence grows with match count
/// and the margin over the runner-up category.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClassifier;

impl LocalClassifier {
    pub fn classify(&self, text: &str) -> (String, f64) {
        let lower = text.to_lowercase();
        let mut scores: Vec<(&str, usize)> = CATEGORY_KEYWORDS
            .iter()
            .map(|(category, keywords)| {
                let hits = keywords.iter().filter(|k| lower.contains(**k)).count();
                (*category, hits)
            })
            .collect();
        scores.sort_by(|a, b| b.1.cmp(&a.1));

        let (best, best_hits) = scores[0];
        if best_hits == 0 {
            return ("general".to_string(), 0.1);
        }
        let runner_up = scores[1].1;
        let margin = best_hits - runner_up;
        let confidence = (0.4 + 0.15 * margin as f64 + 0.05 * best_hits as f64).min(0.95);
        (best.to_string(), confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_quantitative_text() {
        let classifier = LocalClassifier;
        let (category, confidence) = classifier.classify(
            "A train travels at an average speed of 80 km/h. Find the distance covered.",
        );
        assert_eq!(category, "quantitative");
        assert!(confidence > 0.5);
    }

    #[test]
    fn classifies_technical_text() {
        let classifier = LocalClassifier;
        let (category, _) = classifier
            .classify("What is the output of the following code if the array has four elements?");
        assert_eq!(category, "technical");
    }

    #[test]
    fn unknown_text_falls_back_to_general() {
        let classifier = LocalClassifier;
        let (category, confidence) = classifier.classify("The sky is frequently blue.");
        assert_eq!(category, "general");
        assert!(confidence < 0.2);
    }
}
