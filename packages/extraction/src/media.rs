//! Media extraction: find an image reference in a response envelope.
//!
//! Checks run in a fixed order and the first hit wins:
//!
//! 1. typed content block carrying a media locator
//! 2. http(s) image URL in the free text
//! 3. `data:image/...;base64,...` literal in the free text (strict, then loose)
//! 4. the whole free text is itself a base64 image payload
//! 5. data URI anywhere in the serialized envelope
//!
//! Each check only returns references a browser can display directly.

use std::sync::LazyLock;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::result::ExtractionResult;
use crate::text::free_text;

/// Bare payloads shorter than this are more likely words than images.
pub const MIN_BARE_BASE64_LEN: usize = 100;

/// Shortest payload accepted after a `data:image/...;base64,` prefix.
const MIN_DATA_URI_PAYLOAD_LEN: usize = 8;

const MAX_DEPTH: usize = 32;

static RE_IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)https?://[^\s"'<>()\[\]{}\\]+\.(?:png|jpe?g|gif|webp|avif|bmp)\b(?:\?[^\s"'<>()\[\]{}\\]*)?"#,
    )
    .unwrap()
});

static RE_DATA_URI_STRICT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"data:image/(?:png|jpeg|jpg|gif|webp);base64,[A-Za-z0-9+/]+={0,2}").unwrap()
});

/// Tolerates odd subtypes, spaces around separators, and payloads broken by
/// real or escaped newlines.
static RE_DATA_URI_LOOSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)data:image/([a-z0-9.+-]+)\s*;\s*base64\s*,\s*((?:[A-Za-z0-9+/=]|\\[nr]|\r|\n)+)",
    )
    .unwrap()
});

static RE_BARE_BASE64: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").unwrap());

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Extract a media reference from a response envelope.
pub fn extract_media(envelope: &Value) -> ExtractionResult {
    if let Some(reference) = find_typed_block(envelope, 0) {
        debug!(step = "typed_block", "Media extraction resolved");
        return ExtractionResult::Media(reference);
    }

    let text = free_text(envelope);

    if let Some(m) = RE_IMAGE_URL.find(&text) {
        debug!(step = "image_url", "Media extraction resolved");
        return ExtractionResult::Media(m.as_str().to_string());
    }

    if let Some(reference) = find_data_uri(&text) {
        debug!(step = "data_uri", "Media extraction resolved");
        return ExtractionResult::Media(reference);
    }

    if let Some(reference) = bare_base64(&text) {
        debug!(step = "bare_base64", "Media extraction resolved");
        return ExtractionResult::Media(reference);
    }

    if let Ok(serialized) = serde_json::to_string(envelope) {
        if let Some(reference) = find_data_uri(&serialized) {
            debug!(step = "serialized_sweep", "Media extraction resolved");
            return ExtractionResult::Media(reference);
        }
    }

    ExtractionResult::Unresolved(text)
}

/// Depth-first search for a typed block that carries an image.
fn find_typed_block(value: &Value, depth: usize) -> Option<String> {
    if depth > MAX_DEPTH {
        return None;
    }
    match value {
        Value::Array(items) => items
            .iter()
            .find_map(|item| find_typed_block(item, depth + 1)),
        Value::Object(map) => {
            locator_from_block(map).or_else(|| {
                map.values()
                    .find_map(|child| find_typed_block(child, depth + 1))
            })
        }
        _ => None,
    }
}

/// Locator carried by one block, if the block declares itself an image.
fn locator_from_block(map: &Map<String, Value>) -> Option<String> {
    // Inline data blocks are typed by their MIME type rather than a `type` field.
    for key in ["inline_data", "inlineData"] {
        if let Some(Value::Object(inline)) = map.get(key) {
            if let Some(uri) = inline_payload(inline) {
                return Some(uri);
            }
        }
    }

    let block_type = map.get("type").and_then(Value::as_str)?;
    if !block_type.to_ascii_lowercase().contains("image") {
        return None;
    }

    let candidates = [
        map.get("image_url").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }),
        map.get("url").and_then(Value::as_str).map(str::to_string),
        map.get("source").and_then(Value::as_object).and_then(inline_payload),
        inline_payload(map),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| is_displayable(candidate))
}

/// Build a data URI from `{mime_type|media_type|mimeType, data|b64_json}`.
fn inline_payload(map: &Map<String, Value>) -> Option<String> {
    let data = ["data", "b64_json", "image_base64"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))?;

    if data.starts_with("data:image/") || data.starts_with("http://") || data.starts_with("https://") {
        return Some(data.to_string());
    }

    let mime = ["mime_type", "media_type", "mimeType", "mediaType"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .or_else(|| sniff_mime(data).map(str::to_string))?;

    if !mime.starts_with("image/") {
        return None;
    }
    let payload: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.len() < MIN_DATA_URI_PAYLOAD_LEN || !RE_BARE_BASE64.is_match(&payload) {
        return None;
    }
    Some(format!("data:{};base64,{}", mime, payload))
}

fn is_displayable(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("data:image/")
}

/// Strict data-URI pattern first, then the loose one.
fn find_data_uri(text: &str) -> Option<String> {
    if let Some(m) = RE_DATA_URI_STRICT.find(text) {
        let payload_len = m.as_str().split_once(',').map(|(_, p)| p.len()).unwrap_or(0);
        if payload_len >= MIN_DATA_URI_PAYLOAD_LEN {
            return Some(m.as_str().to_string());
        }
    }

    for caps in RE_DATA_URI_LOOSE.captures_iter(text) {
        let subtype = caps[1].to_ascii_lowercase();
        let subtype = if subtype == "jpg" { "jpeg".to_string() } else { subtype };
        let payload = caps[2]
            .replace("\\n", "")
            .replace("\\r", "")
            .replace(['\n', '\r'], "");
        if payload.len() >= MIN_DATA_URI_PAYLOAD_LEN && RE_BARE_BASE64.is_match(&payload) {
            return Some(format!("data:image/{};base64,{}", subtype, payload));
        }
    }

    None
}

/// The whole text is a base64 image: wrap it in a data URI.
fn bare_base64(text: &str) -> Option<String> {
    let payload: String = text.trim().replace(['\n', '\r'], "");
    if payload.len() < MIN_BARE_BASE64_LEN || !RE_BARE_BASE64.is_match(&payload) {
        return None;
    }
    if LENIENT_BASE64.decode(&payload).is_err() {
        return None;
    }
    let mime = sniff_mime(&payload).unwrap_or("image/png");
    Some(format!("data:{};base64,{}", mime, payload))
}

/// MIME type from the base64 form of well-known magic numbers.
fn sniff_mime(payload: &str) -> Option<&'static str> {
    let payload = payload.trim_start();
    if payload.starts_with("iVBORw0KGgo") {
        Some("image/png")
    } else if payload.starts_with("/9j/") {
        Some("image/jpeg")
    } else if payload.starts_with("R0lGOD") {
        Some("image/gif")
    } else if payload.starts_with("UklGR") {
        Some("image/webp")
    } else {
        None
    }
}
