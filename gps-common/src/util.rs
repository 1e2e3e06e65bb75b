//! Small string helpers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so multi-byte text is never split.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)(api[_-]?key|apikey|key)[=:]\s*[A-Za-z0-9_\-]{20,}", "$1=***REDACTED***"),
        (r"(?i)(token|secret|bearer)\s*[=:]?\s*[A-Za-z0-9_\-\.]{10,}", "$1 ***REDACTED***"),
        (r"sk-[a-zA-Z0-9_\-]{20,}", "***REDACTED_API_KEY***"),
        (r"AIza[0-9A-Za-z_\-]{30,}", "***REDACTED_API_KEY***"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Sanitize a string for safe logging (redact key-like tokens).
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Scrub and shorten a backend error body before it is logged or stored.
pub fn sanitize_api_error(body: &str) -> String {
    truncate_with_ellipsis(&sanitize_for_log(body.trim()), 300)
}

/// Collapse newlines and carriage returns so a value fits in one CSV cell line.
pub fn single_line(s: &str) -> String {
    s.replace("\r\n", " ").replace(['\n', '\r'], " ")
}
