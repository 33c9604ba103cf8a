//! Normalization of user-supplied file names and MIME types.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Upper bound, in bytes, for sanitized names and MIME types.
pub const MAX_FIELD_LEN: usize = 255;

/// Substituted when a name sanitizes to nothing.
pub const FALLBACK_FILENAME: &str = "unnamed_file";

/// Substituted when a MIME type sanitizes to nothing.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

static DISALLOWED_NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^a-zA-Z0-9.\-_ ]+").expect("filename regex is valid")
});

static CONTROL_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x00-\x1f\x7f]").expect("control character regex is valid")
});

/// Turn raw, possibly invalid bytes into a safe display name.
///
/// Invalid UTF-8 becomes `?`, every run of characters outside
/// `[A-Za-z0-9._- ]` becomes a single `_`, leading and trailing spaces and
/// dots are trimmed, and the result is capped at 255 bytes. The output is
/// never empty.
pub fn sanitize_filename(raw: &[u8]) -> String {
    let decoded = decode_lossy(raw);
    let replaced = DISALLOWED_NAME_CHARS.replace_all(&decoded, "_");
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return FALLBACK_FILENAME.to_owned();
    }
    truncate_on_char_boundary(trimmed, MAX_FIELD_LEN).to_owned()
}

/// Turn a declared MIME type into a safe, non-empty value.
pub fn sanitize_mime_type(raw: &[u8]) -> String {
    let decoded = decode_lossy(raw);
    let stripped = CONTROL_CHARS.replace_all(&decoded, "");
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return FALLBACK_MIME_TYPE.to_owned();
    }
    truncate_on_char_boundary(trimmed, MAX_FIELD_LEN).to_owned()
}

fn decode_lossy(raw: &[u8]) -> Cow<'_, str> {
    match String::from_utf8_lossy(raw) {
        Cow::Borrowed(s) => Cow::Borrowed(s),
        Cow::Owned(s) => Cow::Owned(s.replace(char::REPLACEMENT_CHARACTER, "?")),
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
