//! Generation request and response envelope types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::image::PreparedImage;

// =============================================================================
// Request
// =============================================================================

/// A source image attached to a request, before preparation.
#[derive(Clone)]
pub struct AttachedImage {
    /// Raw file bytes as uploaded or downloaded
    pub bytes: Vec<u8>,

    /// Short label included in logs (file name, role in the prompt)
    pub label: String,
}

impl std::fmt::Debug for AttachedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedImage")
            .field("label", &self.label)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl AttachedImage {
    pub fn new(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            label: label.into(),
        }
    }
}

/// Normalized multimodal generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier understood by the backend
    pub model: String,

    /// Rendered prompt text
    pub prompt: String,

    /// Images sent alongside the prompt, in order
    pub attached_images: Vec<AttachedImage>,

    /// Extra backend parameters merged into the request body
    pub parameters: Map<String, Value>,
}

impl GenerationRequest {
    /// Create a request with the given model and prompt.
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            attached_images: Vec::new(),
            parameters: Map::new(),
        }
    }

    /// Attach an image.
    pub fn image(mut self, image: AttachedImage) -> Self {
        self.attached_images.push(image);
        self
    }

    /// Set a backend parameter (temperature, modalities, ...).
    pub fn parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

/// Build the chat-completions style body for a request whose images have
/// already been prepared.
pub(crate) fn request_body(request: &GenerationRequest, images: &[PreparedImage]) -> Value {
    let mut content = vec![json!({ "type": "text", "text": request.prompt })];
    for image in images {
        content.push(json!({
            "type": "image_url",
            "image_url": { "url": image.to_data_uri() },
        }));
    }

    let mut body = Map::new();
    for (key, value) in &request.parameters {
        body.insert(key.clone(), value.clone());
    }
    // Model and messages always win over caller parameters.
    body.insert("model".into(), Value::String(request.model.clone()));
    body.insert(
        "messages".into(),
        json!([{ "role": "user", "content": content }]),
    );
    Value::Object(body)
}

// =============================================================================
// Response
// =============================================================================

/// One typed block of backend output, kept exactly as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentBlock(pub Value);

impl ContentBlock {
    /// The block's declared `type`, if any.
    pub fn block_type(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Text carried by a text block.
    pub fn text(&self) -> Option<&str> {
        self.0.get("text").and_then(Value::as_str)
    }
}

/// The backend's response, classified by shape but otherwise unmodified.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResponseEnvelope {
    /// A list of typed content blocks
    Blocks(Vec<ContentBlock>),
    /// A single free-text answer
    Text(String),
    /// Any other JSON object
    Object(Value),
}

impl GenerationResponseEnvelope {
    /// Classify a raw response body.
    ///
    /// Chat-completion bodies are unwrapped to the first choice's message;
    /// anything unrecognized is kept whole as [`GenerationResponseEnvelope::Object`].
    pub fn from_raw(raw: &Value) -> Self {
        if let Some(message) = raw
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.get("message"))
        {
            if let Some(envelope) = Self::from_message(message) {
                return envelope;
            }
        }

        match raw {
            Value::String(text) => Self::Text(text.clone()),
            Value::Array(items) => Self::Blocks(items.iter().cloned().map(ContentBlock).collect()),
            other => Self::Object(other.clone()),
        }
    }

    fn from_message(message: &Value) -> Option<Self> {
        let images: Vec<ContentBlock> = message
            .get("images")
            .and_then(Value::as_array)
            .map(|items| items.iter().cloned().map(ContentBlock).collect())
            .unwrap_or_default();

        match message.get("content") {
            Some(Value::String(text)) if images.is_empty() => Some(Self::Text(text.clone())),
            Some(Value::String(text)) => {
                let mut blocks = vec![ContentBlock(json!({ "type": "text", "text": text }))];
                blocks.extend(images);
                Some(Self::Blocks(blocks))
            }
            Some(Value::Array(parts)) => {
                let mut blocks: Vec<ContentBlock> = parts.iter().cloned().map(ContentBlock).collect();
                blocks.extend(images);
                Some(Self::Blocks(blocks))
            }
            _ if !images.is_empty() => Some(Self::Blocks(images)),
            _ => None,
        }
    }

    /// JSON view of the envelope, used by shape-agnostic extraction.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Blocks(blocks) => Value::Array(blocks.iter().map(|b| b.0.clone()).collect()),
            Self::Text(text) => Value::String(text.clone()),
            Self::Object(value) => value.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Blocks(blocks) => blocks.is_empty(),
            Self::Text(text) => text.trim().is_empty(),
            Self::Object(value) => value.is_null(),
        }
    }
}

/// Token usage statistics, when the backend reports them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Everything returned from one generation call.
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    /// Classified view of the output
    pub envelope: GenerationResponseEnvelope,

    /// The body exactly as received
    pub raw: Value,

    /// Usage statistics, if reported
    pub usage: Option<Usage>,
}

impl GenerationResponse {
    pub fn from_raw(raw: Value) -> Self {
        let usage = raw
            .get("usage")
            .cloned()
            .and_then(|u| serde_json::from_value(u).ok());
        Self {
            envelope: GenerationResponseEnvelope::from_raw(&raw),
            raw,
            usage,
        }
    }
}

/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}
