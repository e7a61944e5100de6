//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod retry;

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Normalize whitespace in text
pub fn normalize_whitespace(text: &str) -> String {
    static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();

    let re = WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("Invalid regex pattern"));

    re.replace_all(text.trim(), " ").to_string()
}

/// Build a URL-safe slug: lowercase ASCII alphanumerics separated by single dashes
pub fn slugify(text: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();

    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("Invalid regex pattern"));

    let lowered = text.to_lowercase();
    re.replace_all(&lowered, "-").trim_matches('-').to_string()
}

/// Check that a string is an absolute http(s) URL
pub fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

/// Truncate text to a maximum length (in characters)
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
