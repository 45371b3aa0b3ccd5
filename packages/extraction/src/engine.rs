//! Shape-driven dispatch over the structured and media extractors.

use serde_json::Value;
use tracing::debug;

use crate::media::extract_media;
use crate::result::{ExtractionResult, ResultShape};
use crate::structured::extract_structured;
use crate::text::{free_text, snippet};

/// Stateless entry point used by the job orchestrator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionEngine;

impl ExtractionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Extract a result of the requested shape from a response envelope.
    ///
    /// Pure: the same envelope always yields the same result.
    pub fn extract(&self, shape: ResultShape, envelope: &Value) -> ExtractionResult {
        let result = match shape {
            ResultShape::Structured => Self::structured(envelope),
            ResultShape::Media => extract_media(envelope),
        };

        match &result {
            ExtractionResult::Unresolved(text) => debug!(
                ?shape,
                searched = %snippet(text, 120),
                "Extraction unresolved"
            ),
            _ => debug!(?shape, "Extraction resolved"),
        }

        result
    }

    fn structured(envelope: &Value) -> ExtractionResult {
        let text = free_text(envelope);
        if text.trim().is_empty() {
            // Backend already answered with bare JSON and no prose around it.
            return match envelope {
                Value::Object(map) if !map.is_empty() => ExtractionResult::Json(envelope.clone()),
                Value::Array(items) if !items.is_empty() => ExtractionResult::Json(envelope.clone()),
                _ => ExtractionResult::Unresolved(text),
            };
        }
        extract_structured(&text)
    }
}
