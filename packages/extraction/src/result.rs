//! Extraction outcome types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a job kind expects the backend to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    /// A JSON object or array embedded somewhere in free text
    Structured,
    /// An image, as a URL or data URI
    Media,
}

/// Outcome of running extraction over a backend response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// Parsed structured data
    Json(Value),
    /// A media reference: `http(s)://...` URL or `data:image/...;base64,...` URI
    Media(String),
    /// Nothing usable was found; carries the text that was searched
    Unresolved(String),
}

impl ExtractionResult {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ExtractionResult::Unresolved(_))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ExtractionResult::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_media(&self) -> Option<&str> {
        match self {
            ExtractionResult::Media(reference) => Some(reference),
            _ => None,
        }
    }
}
