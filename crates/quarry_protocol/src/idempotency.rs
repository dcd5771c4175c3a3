//! Stable content hashing for extraction-time dedupe and the embedding cache.

use blake3::Hasher;

const SEP: u8 = 0x1f;

fn hash_parts(parts: &[&str]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[SEP]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Collapse whitespace and lowercase so cosmetic markup differences do not
/// produce distinct keys.
fn canonical_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Dedupe key for a question at extraction time.
///
/// Components:
/// - source_id
/// - target_id
/// - canonicalized question text
pub fn stable_extract_key(source_id: &str, target_id: &str, question_text: &str) -> String {
    hash_parts(&[source_id, target_id, &canonical_text(question_text)])
}

/// Cache key for an embedding of unchanged text.
pub fn text_hash(text: &str) -> String {
    hash_parts(&[&canonical_text(text)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_key_ignores_whitespace_and_case() {
        let a = stable_extract_key("src", "t1", "What   is\n2 + 2?");
        let b = stable_extract_key("src", "t1", "what is 2 + 2?");
        assert_eq!(a, b);
    }

    #[test]
    fn extract_key_separates_fields() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = stable_extract_key("ab", "c", "q");
        let b = stable_extract_key("a", "bc", "q");
        assert_ne!(a, b);
    }

    #[test]
    fn text_hash_is_stable() {
        assert_eq!(text_hash("Hello  World"), text_hash("hello world"));
        assert_ne!(text_hash("hello world"), text_hash("hello worlds"));
    }
}
