//! Utility functions for Eco Guardian services.

use std::sync::LazyLock;

use regex::Regex;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries, so accented Portuguese text is never split
/// inside a code point.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// First `max_chars` characters of `s`, suffixed with `[...]` when cut.
pub fn preview(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}[...]", &s[..idx]),
        None => s.to_string(),
    }
}

/// Longest prefix of `s` holding at most `max_chars` characters.
pub fn char_prefix(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

static SECRET_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)(api[_-]?key|apikey)[=:]\s*\S{20,}", "$1=***REDACTED***"),
        (r"(?i)(password|passwd|pwd)[=:]\s*\S+", "$1=***REDACTED***"),
        (r"(?i)(bearer)\s+\S{10,}", "$1 ***REDACTED***"),
        (r"sk-[a-zA-Z0-9_-]{20,}", "***REDACTED_API_KEY***"),
    ]
    .into_iter()
    .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, r)))
    .collect()
});

/// Sanitize a string for safe logging (redact sensitive patterns).
pub fn sanitize_for_log(s: &str) -> String {
    let mut result = s.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        result = re.replace_all(&result, *replacement).to_string();
    }
    result
}

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
