//! Multimodal generation backend client
//!
//! A thin client that sends one normalized request (prompt text plus bounded,
//! re-encoded images) to a chat-completions compatible generative backend and
//! hands back the response envelope exactly as the backend shaped it. It does
//! no extraction and has no persistence side effects.
//!
//! # Example
//!
//! ```rust,ignore
//! use generation_client::{ClientSettings, GenerationAdapter, GenerationClient, GenerationRequest};
//!
//! let client = GenerationClient::new(ClientSettings::new(Some(api_key)));
//!
//! let response = client
//!     .generate(GenerationRequest::new("google/gemini-2.5-flash", "Summarize this market"))
//!     .await?;
//!
//! println!("{:?}", response.envelope);
//! ```

pub mod credentials;
pub mod error;
pub mod image;
pub mod testing;
pub mod types;

pub use credentials::ApiKey;
pub use error::{GenerationError, Result};
pub use image::{prepare_image, ImageOptions, PreparedImage};
pub use types::*;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

/// Default backend: OpenRouter's chat-completions compatible API.
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// How much of an error body is kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

/// Sends one generation request and returns the raw envelope.
///
/// Implementations make a single attempt; retrying is the caller's decision.
#[async_trait]
pub trait GenerationAdapter: Send + Sync {
    /// Fail with [`GenerationError::Configuration`] if a credential is missing.
    ///
    /// Callers use this as a pre-flight check before acquiring any resources.
    fn ensure_configured(&self) -> Result<()>;

    /// Send the request and return the backend's response envelope.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;
}

/// Identification metadata attached to every request.
#[derive(Debug, Clone)]
pub struct AppIdentity {
    pub name: String,
    pub url: Option<String>,
}

impl Default for AppIdentity {
    fn default() -> Self {
        Self {
            name: "studio".to_string(),
            url: None,
        }
    }
}

/// Settings for [`GenerationClient`].
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_key: Option<ApiKey>,
    pub base_url: String,
    pub timeout: Duration,
    pub identity: AppIdentity,
    pub image_options: ImageOptions,
}

impl ClientSettings {
    /// Settings with defaults for everything except the key.
    pub fn new(api_key: Option<ApiKey>) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
            identity: AppIdentity::default(),
            image_options: ImageOptions::default(),
        }
    }

    /// Set a custom base URL (proxies, self-hosted gateways).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_identity(mut self, identity: AppIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_image_options(mut self, options: ImageOptions) -> Self {
        self.image_options = options;
        self
    }
}

/// HTTP generation client.
#[derive(Clone)]
pub struct GenerationClient {
    http_client: Client,
    settings: ClientSettings,
}

impl GenerationClient {
    /// Create a new client.
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            http_client: Client::new(),
            settings,
        }
    }

    /// Create from environment variable `GENERATION_API_KEY`.
    ///
    /// A missing key is not an error here; it surfaces from
    /// [`GenerationAdapter::ensure_configured`] on first use.
    pub fn from_env() -> Self {
        let api_key = std::env::var("GENERATION_API_KEY").ok().map(ApiKey::from);
        let mut settings = ClientSettings::new(api_key);
        if let Ok(url) = std::env::var("GENERATION_BASE_URL") {
            settings = settings.with_base_url(url);
        }
        Self::new(settings)
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.settings.base_url
    }

    /// Get the image preparation limits.
    pub fn image_options(&self) -> ImageOptions {
        self.settings.image_options
    }

    fn api_key(&self) -> Result<&ApiKey> {
        match &self.settings.api_key {
            Some(key) if !key.is_blank() => Ok(key),
            _ => Err(GenerationError::Configuration(
                "generation API key is not configured".into(),
            )),
        }
    }

    fn scrub(&self, text: &str) -> String {
        match &self.settings.api_key {
            Some(key) => key.scrub(text),
            None => text.to_string(),
        }
    }
}

/// Prepare every attached image, prefixing failures with the image label.
pub fn prepare_attached(
    attached: &[AttachedImage],
    options: ImageOptions,
) -> Result<Vec<PreparedImage>> {
    attached
        .iter()
        .map(|image| {
            prepare_image(&image.bytes, options).map_err(|e| match e {
                GenerationError::InvalidImage(reason) => {
                    GenerationError::InvalidImage(format!("{}: {}", image.label, reason))
                }
                other => other,
            })
        })
        .collect()
}

#[async_trait]
impl GenerationAdapter for GenerationClient {
    fn ensure_configured(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    async fn generate(&self, mut request: GenerationRequest) -> Result<GenerationResponse> {
        let api_key = self.api_key()?;

        // Decode, resize and re-encode off the async workers.
        let attached = std::mem::take(&mut request.attached_images);
        let options = self.settings.image_options;
        let images = tokio::task::spawn_blocking(move || prepare_attached(&attached, options))
            .await
            .map_err(|e| GenerationError::InvalidImage(format!("image preparation aborted: {}", e)))??;

        let body = types::request_body(&request, &images);
        let request_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        let mut http_request = self
            .http_client
            .post(format!("{}/chat/completions", self.settings.base_url))
            .timeout(self.settings.timeout)
            .header("Authorization", format!("Bearer {}", api_key.expose()))
            .header("Content-Type", "application/json")
            .header("X-Title", &self.settings.identity.name)
            .header("X-Request-Id", &request_id);
        if let Some(url) = &self.settings.identity.url {
            http_request = http_request.header("HTTP-Referer", url);
        }

        let response = http_request.json(&body).send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!("request timed out after {}s", self.settings.timeout.as_secs())
            } else {
                self.scrub(&e.to_string())
            };
            warn!(request_id = %request_id, error = %reason, "Generation request failed");
            GenerationError::UpstreamUnavailable(reason)
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            GenerationError::UpstreamUnavailable(format!(
                "failed to read response body: {}",
                self.scrub(&e.to_string())
            ))
        })?;

        if !status.is_success() {
            let snippet = truncate_to_char_boundary(&text, ERROR_BODY_LIMIT);
            warn!(request_id = %request_id, status = %status, "Generation backend error");
            return Err(GenerationError::UpstreamUnavailable(format!(
                "backend returned {}: {}",
                status,
                self.scrub(snippet)
            )));
        }

        // Non-JSON bodies are passed through as free text.
        let raw = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        debug!(
            request_id = %request_id,
            model = %request.model,
            images = images.len(),
            duration_ms = start.elapsed().as_millis(),
            "Generation completed"
        );

        Ok(GenerationResponse::from_raw(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_builder() {
        let settings = ClientSettings::new(Some(ApiKey::new("sk-test")))
            .with_base_url("https://custom.api.com/v1/")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(settings.base_url, "https://custom.api.com/v1");
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let client = GenerationClient::new(ClientSettings::new(None));
        assert!(matches!(
            client.ensure_configured(),
            Err(GenerationError::Configuration(_))
        ));

        let blank = GenerationClient::new(ClientSettings::new(Some(ApiKey::new(""))));
        assert!(blank.ensure_configured().is_err());
    }

    #[tokio::test]
    async fn generate_without_key_fails_before_network() {
        // Unroutable base URL: reaching the network would surface as upstream error instead.
        let client = GenerationClient::new(
            ClientSettings::new(None).with_base_url("http://127.0.0.1:9"),
        );
        let err = client
            .generate(GenerationRequest::new("m", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Configuration(_)));
    }

    #[tokio::test]
    async fn undecodable_attachment_is_reported_with_label() {
        let client = GenerationClient::new(
            ClientSettings::new(Some(ApiKey::new("k"))).with_base_url("http://127.0.0.1:9"),
        );
        let request = GenerationRequest::new("m", "p")
            .image(AttachedImage::new("garment.png", b"nope".to_vec()));
        let err = client.generate(request).await.unwrap_err();
        match err {
            GenerationError::InvalidImage(reason) => assert!(reason.starts_with("garment.png")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    fn tiny_png() -> Vec<u8> {
        use ::image::{ImageFormat, Rgba, RgbaImage};
        let mut bytes = Vec::new();
        RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]))
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn prepare_attached_names_the_first_bad_image() {
        let attached = vec![
            AttachedImage::new("model.png", tiny_png()),
            AttachedImage::new("garment.png", b"nope".to_vec()),
        ];
        let err = prepare_attached(&attached, ImageOptions::default()).unwrap_err();
        match err {
            GenerationError::InvalidImage(reason) => assert!(reason.starts_with("garment.png")),
            other => panic!("unexpected error: {:?}", other),
        }

        let prepared = prepare_attached(&attached[..1], ImageOptions::default()).unwrap();
        assert_eq!(prepared.len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn image_preparation_leaves_the_runtime_free() {
        use ::image::{ImageFormat, Rgba, RgbaImage};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut large = Vec::new();
        RgbaImage::from_fn(3000, 3000, |x, y| Rgba([(x % 251) as u8, (y % 241) as u8, 90, 255]))
            .write_to(&mut std::io::Cursor::new(&mut large), ImageFormat::Png)
            .unwrap();

        let client = GenerationClient::new(
            ClientSettings::new(Some(ApiKey::new("k"))).with_base_url("http://127.0.0.1:9"),
        );
        let request = GenerationRequest::new("m", "p").image(AttachedImage::new("scene.png", large));

        // Shares the single runtime thread with `generate`.
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(1)).await;
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        let outcome = client.generate(request).await;
        ticker.abort();

        // Decoding, resizing and re-encoding a 9 MP image takes far longer
        // than a handful of ticks; the connection refusal afterwards does not.
        assert!(matches!(outcome, Err(GenerationError::UpstreamUnavailable(_))));
        assert!(ticks.load(Ordering::Relaxed) >= 3);
    }
}
