//! Locate a JSON object inside free-form model output
//!
//! Models wrap JSON in prose or fenced blocks; the object is looked for in a
//! ```` ```json ```` fence, then any fence, then the whole text, then the
//! first balanced `{...}` span.

use serde_json::{Map, Value};

pub fn extract_object(text: &str) -> Option<Map<String, Value>> {
    fenced(text, "```json")
        .or_else(|| fenced(text, "```"))
        .or_else(|| as_object(text.trim()))
        .or_else(|| balanced_object(text))
}

fn as_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn fenced(text: &str, opener: &str) -> Option<Map<String, Value>> {
    let mut rest = text;
    while let Some(start) = rest.find(opener) {
        let body = &rest[start + opener.len()..];
        let end = body.find("```")?;
        // Skip a language tag on the fence line
        let content = match body[..end].split_once('\n') {
            Some((tag, content)) if !tag.trim_start().starts_with('{') => content,
            _ => &body[..end],
        };
        if let Some(map) = as_object(content.trim()) {
            return Some(map);
        }
        rest = &body[end + 3..];
    }
    None
}

/// Try every `{` in turn, parsing up to its matching `}`
fn balanced_object(text: &str) -> Option<Map<String, Value>> {
    text.match_indices('{')
        .find_map(|(start, _)| matching_brace(&text[start..]).and_then(as_object))
}

fn matching_brace(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
