//! Failure message canonicalization
//!
//! Failures that differ only in volatile details (timeouts, ports, dates)
//! collapse to the same signature so they can be grouped.

use once_cell::sync::Lazy;
use regex::Regex;

/// Signature used when a failure carries no message
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Signatures are cut to this many characters
pub const MAX_SIGNATURE_CHARS: usize = 200;

static ANSI_SGR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
static MILLIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+ms").unwrap());
static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
static HOST_PORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d{1,3}){3}|[A-Za-z][A-Za-z0-9-]*(?:\.[A-Za-z0-9-]+)*):\d+").unwrap()
});

/// Canonicalize a failure message into a grouping signature.
pub fn normalize_error(message: Option<&str>) -> String {
    let Some(message) = message else {
        return UNKNOWN_ERROR.to_string();
    };

    let text = ANSI_SGR.replace_all(message, "");
    let text = MILLIS.replace_all(&text, "Xms");
    // Dates go before host:port so "DATE:80" cannot appear on a second pass
    let text = ISO_DATE.replace_all(&text, "DATE");
    let text = HOST_PORT.replace_all(&text, "${1}:PORT");

    let first_line = text.lines().next().unwrap_or("");
    first_line.chars().take(MAX_SIGNATURE_CHARS).collect()
}
