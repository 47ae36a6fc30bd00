//! # Payload Sanitization
//!
//! Scrubs strings that originate in untrusted page content before they reach
//! handlers in privileged contexts. The rules are deliberately blunt: script
//! blocks are removed wholesale, dangerous URI schemes are excised, and
//! anything shaped like an inline event-handler attribute is dropped.
//!
//! Sanitization is structural: every string in a JSON payload is scrubbed,
//! however deeply nested. Non-string values pass through untouched.

use serde_json::Value;

/// URI schemes removed from payload strings.
const DANGEROUS_SCHEMES: [&str; 3] = ["javascript:", "vbscript:", "data:text/html"];

/// Recursively sanitizes every string in a JSON value.
#[must_use]
pub fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Applies all scrubbing passes to one string.
#[must_use]
pub fn sanitize_text(input: &str) -> String {
    let mut out = strip_script_blocks(input);
    for scheme in DANGEROUS_SCHEMES {
        out = remove_all_ci(&out, scheme);
    }
    strip_event_handlers(&out)
}

/// Case-insensitive ASCII substring search starting at `from`.
///
/// Needles are ASCII-only, so any match starts and ends on a char boundary.
fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let ned = needle.as_bytes();
    if ned.is_empty() || hay.len() < from + ned.len() {
        return None;
    }
    (from..=hay.len() - ned.len()).find(|&i| hay[i..i + ned.len()].eq_ignore_ascii_case(ned))
}

/// Removes `<script ...>...</script>` blocks. An unclosed opening tag drops
/// everything to the end of the string (fail closed).
fn strip_script_blocks(s: &str) -> String {
    const OPEN: &str = "<script";
    const CLOSE: &str = "</script>";

    let mut out = String::with_capacity(s.len());
    let mut idx = 0;
    while let Some(start) = find_ci(s, OPEN, idx) {
        out.push_str(&s[idx..start]);
        match find_ci(s, CLOSE, start) {
            Some(end) => idx = end + CLOSE.len(),
            None => {
                idx = s.len();
                break;
            }
        }
    }
    out.push_str(&s[idx..]);
    out
}

/// Removes every case-insensitive occurrence of `needle`.
fn remove_all_ci(s: &str, needle: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut idx = 0;
    while let Some(start) = find_ci(s, needle, idx) {
        out.push_str(&s[idx..start]);
        idx = start + needle.len();
    }
    out.push_str(&s[idx..]);
    out
}

/// Removes `onXxx=...` attribute patterns, including their quoted or
/// unquoted values.
fn strip_event_handlers(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        if is_handler_start(bytes, i) {
            if let Some(end) = handler_end(bytes, i) {
                i = end;
                continue;
            }
        }
        let ch_len = utf8_len(bytes[i]);
        out.push_str(&s[i..i + ch_len]);
        i += ch_len;
    }
    out
}

/// A handler candidate is `on` followed by a letter, not preceded by an
/// identifier character.
fn is_handler_start(bytes: &[u8], i: usize) -> bool {
    if i > 0 {
        let prev = bytes[i - 1];
        if prev.is_ascii_alphanumeric() || prev == b'_' {
            return false;
        }
    }
    i + 3 <= bytes.len()
        && bytes[i].eq_ignore_ascii_case(&b'o')
        && bytes[i + 1].eq_ignore_ascii_case(&b'n')
        && bytes[i + 2].is_ascii_alphabetic()
}

/// Returns the byte index just past a handler attribute, or `None` if the
/// candidate is not followed by `=` and a value.
fn handler_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 2;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'=' {
        return None;
    }
    i += 1;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
        let quote = bytes[i];
        i += 1;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        if i < bytes.len() {
            i += 1;
        }
    } else {
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
            i += 1;
        }
    }
    Some(i)
}

/// Length of the UTF-8 sequence starting with `b`.
fn utf8_len(b: u8) -> usize {
    if b < 0x80 {
        1
    } else if b >> 5 == 0b110 {
        2
    } else if b >> 4 == 0b1110 {
        3
    } else {
        4
    }
}
