//! Free-text views over arbitrary response JSON.

use serde_json::Value;

/// Keys that carry human-readable output in the response shapes we have seen,
/// in the order they are visited.
const TEXT_KEYS: &[&str] = &[
    "text",
    "output_text",
    "content",
    "message",
    "choices",
    "candidates",
    "parts",
    "output",
    "response",
    "result",
];

/// Collect the free-text content of a response.
///
/// Strings are returned as-is; arrays and objects are walked through the
/// text-bearing keys above and their pieces joined with newlines. Media
/// locators inside typed blocks are not text and are skipped.
pub fn free_text(value: &Value) -> String {
    let mut pieces = Vec::new();
    collect(value, &mut pieces, 0);
    pieces.join("\n")
}

fn collect(value: &Value, pieces: &mut Vec<String>, depth: usize) {
    // Responses are shallow; anything deeper is a pathological payload.
    if depth > 32 {
        return;
    }
    match value {
        Value::String(s) => {
            if !s.trim().is_empty() {
                pieces.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, pieces, depth + 1);
            }
        }
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(child) = map.get(*key) {
                    collect(child, pieces, depth + 1);
                }
            }
        }
        _ => {}
    }
}

/// First `max_chars` characters of `text`, for diagnostics.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
