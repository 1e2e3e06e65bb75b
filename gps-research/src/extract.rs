//! Pull a JSON object out of free-form model output.
//!
//! Replies wrap their JSON in prose, Markdown fences or both. Extraction
//! strips a ```` ```json ```` fence when present, then tries the widest
//! `{ ... }` span, then every balanced object from left to right.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)\s*(.*?)```").unwrap());

/// Remove Markdown code fences, keeping the fenced body when one is tagged `json`.
pub fn strip_fences(text: &str) -> String {
    if let Some(caps) = JSON_FENCE.captures(text) {
        if let Some(body) = caps.get(1) {
            return body.as_str().trim().to_string();
        }
    }
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        return trimmed.replace("```", "").trim().to_string();
    }
    trimmed.to_string()
}

/// Extract the first well-formed JSON object from a reply.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let body = strip_fences(text);

    // Widest span first: first '{' to last '}'
    if let (Some(start), Some(end)) = (body.find('{'), body.rfind('}')) {
        if start < end {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&body[start..=end]) {
                return Some(value);
            }
        }
    }

    balanced_objects(&body)
        .into_iter()
        .find_map(|span| match serde_json::from_str::<Value>(span) {
            Ok(value @ Value::Object(_)) => Some(value),
            _ => None,
        })
}

/// Top-level `{ ... }` spans with balanced braces, ignoring braces inside strings.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        spans.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }
    spans
}
