use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::domains::generation::ResultRetention;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub generation_api_key: Option<String>,
    pub generation_base_url: Option<String>,
    pub generation_text_model: String,
    pub generation_image_model: String,
    pub generation_timeout: Duration,
    pub generation_app_name: String,
    pub generation_app_url: Option<String>,
    pub image_max_dimension: u32,
    pub image_jpeg_quality: u8,
    pub worker_concurrency: usize,
    pub worker_queue_capacity: usize,
    pub file_store_dir: PathBuf,
    pub file_max_bytes: usize,
    pub result_retention: ResultRetention,
    /// How long a Processing claim holds before Start may take the job over
    pub job_lease: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            // A missing key is reported per job, not at startup.
            generation_api_key: env::var("GENERATION_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            generation_base_url: env::var("GENERATION_BASE_URL").ok(),
            generation_text_model: env::var("GENERATION_TEXT_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash".to_string()),
            generation_image_model: env::var("GENERATION_IMAGE_MODEL")
                .unwrap_or_else(|_| "google/gemini-2.5-flash-image-preview".to_string()),
            generation_timeout: Duration::from_secs(parse_or("GENERATION_TIMEOUT_SECS", 120)?),
            generation_app_name: env::var("GENERATION_APP_NAME")
                .unwrap_or_else(|_| "studio".to_string()),
            generation_app_url: env::var("GENERATION_APP_URL").ok(),
            image_max_dimension: parse_or("IMAGE_MAX_DIMENSION", 1024)?,
            image_jpeg_quality: parse_or("IMAGE_JPEG_QUALITY", 85)?,
            worker_concurrency: parse_or("WORKER_CONCURRENCY", 4)?,
            worker_queue_capacity: parse_or("WORKER_QUEUE_CAPACITY", 32)?,
            file_store_dir: env::var("FILE_STORE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("studio-files")),
            file_max_bytes: parse_or("FILE_MAX_BYTES", 20 * 1024 * 1024)?,
            result_retention: env::var("RESULT_RETENTION")
                .unwrap_or_else(|_| "clear_at_start".to_string())
                .parse::<ResultRetention>()
                .map_err(anyhow::Error::msg)
                .context("RESULT_RETENTION must be clear_at_start or keep_until_replaced")?,
            job_lease: Duration::from_secs(parse_or("JOB_LEASE_SECS", 600)?),
        })
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
