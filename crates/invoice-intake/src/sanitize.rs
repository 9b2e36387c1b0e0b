//! Helpers for scrubbing data before it reaches logs, spans or callers.
//!
//! Extractor errors routinely echo request headers and local paths; only the
//! output of [`user_safe_error`] may be stored on a job or returned.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of an error message handed back to callers.
pub const MAX_ERROR_CHARS: usize = 200;

static RE_API_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-ant-[A-Za-z0-9_\-]+").unwrap());
static RE_BEARER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(bearer|x-api-key:?)\s+[A-Za-z0-9_\-.]+").unwrap());
// Absolute paths at a token boundary; URL paths are preceded by a host and never match.
static RE_ABS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(^|[\s'"(=])((?:/[\w.\-]+){2,}|[A-Za-z]:\\(?:[^\\\s'"]+\\)*[^\\\s'"]+)"#)
        .unwrap()
});

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks anything that looks like an API key or bearer token.
///
/// - `invalid key sk-ant-api03-abc` → `invalid key sk-ant-****`
/// - `Authorization: Bearer abc.def` → `Authorization: Bearer ****`
pub fn redact_secrets(text: &str) -> String {
    let masked = RE_API_KEY.replace_all(text, "sk-ant-****");
    RE_BEARER.replace_all(&masked, "$1 ****").into_owned()
}

/// Reduces absolute paths to their file name.
///
/// - `cannot open /home/ana/scans/a_page_1.png` → `cannot open a_page_1.png`
pub fn redact_paths(text: &str) -> String {
    RE_ABS_PATH
        .replace_all(text, |caps: &regex::Captures| {
            let path = caps[2].replace('\\', "/");
            format!("{}{}", &caps[1], redact_path(Path::new(&path)))
        })
        .into_owned()
}

/// Message suitable for callers: secrets and paths masked, first line only,
/// truncated.
pub fn user_safe_error(text: &str) -> String {
    let redacted = redact_paths(&redact_secrets(text));
    let first_line = redacted.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX_ERROR_CHARS {
        return first_line.to_string();
    }
    let truncated: String = first_line.chars().take(MAX_ERROR_CHARS - 3).collect();
    format!("{}...", truncated)
}
