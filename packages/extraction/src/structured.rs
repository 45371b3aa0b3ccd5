//! Structured extraction: pull a JSON value out of free text.
//!
//! Backends asked for JSON answer with JSON wrapped in prose, markdown fences,
//! double-escaped strings, trailing commas, or a run of loose objects. The
//! steps below are tried in order and the first parse that succeeds wins:
//!
//! 1. balanced span from the first `{`/`[`
//! 2. that span with trailing commas removed
//! 3. a balanced span of the normalized text
//! 4. a sweep for flat object fragments, assembled into an array
//!
//! Nothing here panics on arbitrary input; failure is [`ExtractionResult::Unresolved`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::result::ExtractionResult;

static RE_TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// Object literal without nested braces.
static RE_OBJECT_FRAGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// Extract structured data from `text`.
pub fn extract_structured(text: &str) -> ExtractionResult {
    let span = balanced_span(text);
    if let Some(value) = span.and_then(parse_container) {
        debug!(step = "balanced_span", "Structured extraction resolved");
        return ExtractionResult::Json(value);
    }

    if let Some(value) = span.and_then(|span| parse_container(&strip_trailing_commas(span))) {
        debug!(step = "trailing_commas", "Structured extraction resolved");
        return ExtractionResult::Json(value);
    }

    let normalized = normalize(text);
    if let Some(value) = balanced_span(&normalized).and_then(parse_container) {
        debug!(step = "normalized", "Structured extraction resolved");
        return ExtractionResult::Json(value);
    }

    let fragments = sweep_fragments(&normalized);
    if !fragments.is_empty() {
        debug!(
            step = "fragment_sweep",
            fragments = fragments.len(),
            "Structured extraction resolved"
        );
        return ExtractionResult::Json(Value::Array(fragments));
    }

    ExtractionResult::Unresolved(text.to_string())
}

/// Slice from the first opening brace/bracket to its matching close.
///
/// A single depth counter covers both bracket kinds; braces inside string
/// literals are ignored. If the text ends before the depth returns to zero,
/// the remainder of the text is returned so normalization can still try.
pub fn balanced_span(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
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
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }

    Some(&text[start..])
}

/// Repair the usual damage: literal `\n`/`\t`/`\r` escape sequences between
/// tokens and trailing commas before a closing brace or bracket.
///
/// Escaped quotes are only unescaped when the text is double-encoded JSON;
/// otherwise they belong to string literals and are left alone.
pub fn normalize(text: &str) -> String {
    let collapsed = if is_double_encoded(text) {
        text.replace("\\r\\n", " ")
            .replace("\\n", " ")
            .replace("\\t", " ")
            .replace("\\r", " ")
            .replace("\\\"", "\"")
    } else {
        collapse_escapes_between_tokens(text)
    };
    strip_trailing_commas(&collapsed)
}

/// A JSON document serialized into a string: `{\"key\": ...` or `[\"...`.
fn is_double_encoded(text: &str) -> bool {
    text.contains("{\\\"") || text.contains("[\\\"")
}

/// Replace `\n`, `\t` and `\r` sequences that sit outside string literals.
fn collapse_escapes_between_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;

    while let Some(ch) = chars.next() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(ch);
            continue;
        }

        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '\\' if matches!(chars.peek(), Some('n' | 't' | 'r')) => {
                chars.next();
                out.push(' ');
            }
            _ => out.push(ch),
        }
    }

    out
}

/// Remove commas that directly precede `}` or `]`.
pub fn strip_trailing_commas(text: &str) -> String {
    RE_TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Only objects and arrays count as structured results.
fn parse_container(candidate: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => Some(value),
        _ => None,
    }
}

fn sweep_fragments(text: &str) -> Vec<Value> {
    RE_OBJECT_FRAGMENT
        .find_iter(text)
        .filter_map(|m| parse_container(m.as_str()))
        .filter(Value::is_object)
        .collect()
}
