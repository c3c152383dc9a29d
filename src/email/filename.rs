use chrono::{DateTime, Utc};

const FALLBACK_NAME: &str = "attachment";

/// Calendar day (UTC) used as the filename prefix
pub fn date_key(date: &DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Local filename for a downloaded attachment: `<YYYY-MM-DD>_<filename>`.
/// The same (date, filename) pair always yields the same name, so a second
/// download overwrites the first.
pub fn derive_filename(date: &DateTime<Utc>, filename: &str) -> String {
    format!("{}_{}", date_key(date), sanitize_filename(filename))
}

/// Reduce a sender-supplied filename to a single safe path component.
///
/// Path separators and characters reserved on common filesystems become `_`,
/// control characters are dropped, and leading dots are stripped so the result
/// can never be `.`, `..` or a hidden file.
pub fn sanitize_filename(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect();

    let cleaned = mapped
        .trim_start_matches(|c: char| c == '.' || c.is_whitespace())
        .trim_end();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}
