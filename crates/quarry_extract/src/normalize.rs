//! Source-side text normalization helpers.

/// Collapse runs of whitespace into single spaces.
pub fn clean_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip a leading option letter: "A) ...", "B. ...", "(c) ...", "D: ...".
pub fn strip_option_prefix(option: &str) -> String {
    let trimmed = option.trim();
    let bytes = trimmed.as_bytes();

    // "(a) text"
    if trimmed.len() >= 4 && bytes[0] == b'(' && bytes[2] == b')' && bytes[1].is_ascii_alphabetic()
    {
        return clean_whitespace(&trimmed[3..]);
    }
    // "A) text" / "A. text" / "A: text"
    if trimmed.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && matches!(bytes[1], b')' | b'.' | b':')
        && bytes[2] == b' '
    {
        return clean_whitespace(&trimmed[2..]);
    }
    clean_whitespace(trimmed)
}

/// Remove duplicate options, preserving first-seen order.
pub fn dedupe_options(options: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    options
        .into_iter()
        .filter(|o| seen.insert(o.trim().to_lowercase()))
        .collect()
}

/// Strip a leading "Answer:" style label and resolve option letters.
///
/// Answer blocks come in several shapes: "Answer: B", "Correct answer: B)",
/// "Ans. 80 km/h". A single letter is mapped through `options`; anything
/// else is returned cleaned.
pub fn resolve_answer(raw: &str, options: &[String]) -> Option<String> {
    let mut text = clean_whitespace(raw);
    for label in ["correct answer:", "answer:", "ans:", "ans."] {
        let lower = text.to_lowercase();
        if let Some(rest) = lower.strip_prefix(label) {
            text = clean_whitespace(&text[text.len() - rest.len()..]);
            break;
        }
    }
    let text = text.trim_end_matches(['.', ')']).trim().to_string();
    if text.is_empty() {
        return None;
    }

    if text.len() == 1 {
        let letter = text.chars().next()?.to_ascii_uppercase();
        if letter.is_ascii_alphabetic() {
            let index = (letter as u8 - b'A') as usize;
            return options.get(index).cloned();
        }
    }
    Some(text)
}

/// Best-effort plain text from an HTML fragment that skipped the DOM walk.
pub fn strip_tags(html: &str) -> String {
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
    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    clean_whitespace(&decoded)
}
