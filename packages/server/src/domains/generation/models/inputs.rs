use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

/// Caller-supplied job inputs: named text parameters plus image references.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobInputs {
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

impl JobInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn image(mut self, label: impl Into<String>, source: ImageSource) -> Self {
        self.images.push(ImageRef {
            label: label.into(),
            source,
        });
        self
    }

    /// Non-blank parameter value.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// One input image and the role it plays ("person", "garment", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub label: String,
    #[serde(flatten)]
    pub source: ImageSource,
}

/// Where an input image lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ImageSource {
    /// Remote image, downloaded into a temporary file for the attempt
    Url { url: String },
    /// Previously uploaded file, addressed by its storage key
    Stored { key: String },
}

impl ImageSource {
    pub fn url(url: impl Into<String>) -> Self {
        ImageSource::Url { url: url.into() }
    }

    pub fn stored(key: impl Into<String>) -> Self {
        ImageSource::Stored { key: key.into() }
    }

    /// Shape check only; nothing is fetched.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ImageSource::Url { url } => {
                let parsed = Url::parse(url).map_err(|e| format!("invalid image url: {}", e))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(format!("unsupported image url scheme '{}'", parsed.scheme()));
                }
                if parsed.host_str().is_none() {
                    return Err("image url has no host".to_string());
                }
                Ok(())
            }
            ImageSource::Stored { key } => {
                let valid = !key.is_empty()
                    && !key.starts_with('/')
                    && !key.split('/').any(|part| part.is_empty() || part == "..")
                    && key
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));
                if valid {
                    Ok(())
                } else {
                    Err(format!("invalid stored file key '{}'", key))
                }
            }
        }
    }

    /// Reference a browser can load directly, when there is one.
    pub fn public_url(&self) -> Option<&str> {
        match self {
            ImageSource::Url { url } => Some(url),
            ImageSource::Stored { .. } => None,
        }
    }
}
