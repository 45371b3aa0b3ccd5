//! File access for job inputs.
//!
//! Remote images are downloaded into temporary files that live for one
//! attempt; uploaded files are opened in place and never deleted here.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("could not download {url}: {reason}")]
    Download { url: String, reason: String },

    #[error("{0} is larger than {1} bytes")]
    TooLarge(String, usize),

    #[error("{0} is not a supported image")]
    NotAnImage(String),

    #[error("stored file '{0}' not found")]
    NotFound(String),

    #[error("file store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a readable local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    /// Path relative to the store root
    pub key: String,
    /// Owned by the attempt that created it and deleted on release
    pub temporary: bool,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Download `url` into a temporary file.
    async fn fetch_by_url(&self, url: &str) -> Result<FileHandle, FileStoreError>;

    /// Open a previously uploaded file.
    async fn open_stored(&self, key: &str) -> Result<FileHandle, FileStoreError>;

    async fn read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError>;

    async fn delete(&self, handle: &FileHandle) -> Result<(), FileStoreError>;
}

/// MIME type of a PNG, JPEG, GIF or WebP file from its magic bytes.
pub fn sniff_image_mime(bytes: &[u8]) -> Option<&'static str> {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => Some("image/png"),
        [0xFF, 0xD8, 0xFF, ..] => Some("image/jpeg"),
        [b'G', b'I', b'F', b'8', ..] => Some("image/gif"),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some("image/webp"),
        _ => None,
    }
}

// ============================================================================
// Scoped acquisition
// ============================================================================

/// Temporary files acquired during one attempt.
///
/// Call [`ScopedFiles::release`] on every exit path. Dropping without
/// releasing schedules the deletions on the current runtime instead.
pub struct ScopedFiles {
    store: Arc<dyn FileStore>,
    handles: Vec<FileHandle>,
}

impl ScopedFiles {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            handles: Vec::new(),
        }
    }

    pub async fn acquire_url(&mut self, url: &str) -> Result<Vec<u8>, FileStoreError> {
        let handle = self.store.fetch_by_url(url).await?;
        self.track_and_read(handle).await
    }

    pub async fn acquire_stored(&mut self, key: &str) -> Result<Vec<u8>, FileStoreError> {
        let handle = self.store.open_stored(key).await?;
        self.track_and_read(handle).await
    }

    async fn track_and_read(&mut self, handle: FileHandle) -> Result<Vec<u8>, FileStoreError> {
        if handle.temporary {
            self.handles.push(handle.clone());
        }
        self.store.read(&handle).await
    }

    pub fn pending(&self) -> usize {
        self.handles.len()
    }

    /// Delete every temporary file. Failures are logged, never returned.
    pub async fn release(mut self) {
        let handles = std::mem::take(&mut self.handles);
        delete_all(self.store.as_ref(), handles).await;
    }
}

async fn delete_all(store: &dyn FileStore, handles: Vec<FileHandle>) {
    for handle in handles {
        match store.delete(&handle).await {
            Ok(()) => debug!(key = %handle.key, "Released temporary file"),
            Err(e) => warn!(key = %handle.key, error = %e, "Failed to delete temporary file"),
        }
    }
}

impl Drop for ScopedFiles {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        let store = self.store.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(count = handles.len(), "Temporary files dropped without release");
                runtime.spawn(async move { delete_all(store.as_ref(), handles).await });
            }
            Err(_) => warn!(count = handles.len(), "Temporary files leaked: no runtime"),
        }
    }
}

// ============================================================================
// Local filesystem
// ============================================================================

/// Files under one root directory: uploads by key, downloads under `tmp/`.
pub struct LocalFileStore {
    root: PathBuf,
    http: Client,
    max_bytes: usize,
}

impl LocalFileStore {
    const TEMP_DIR: &'static str = "tmp";

    pub async fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Result<Self, FileStoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(Self::TEMP_DIR)).await?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FileStoreError::Download {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            root,
            http,
            max_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn fetch_by_url(&self, url: &str) -> Result<FileHandle, FileStoreError> {
        let download_err = |reason: String| FileStoreError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(FileStoreError::TooLarge(url.to_string(), self.max_bytes));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| download_err(e.to_string()))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(FileStoreError::TooLarge(url.to_string(), self.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if sniff_image_mime(&bytes).is_none() {
            return Err(FileStoreError::NotAnImage(url.to_string()));
        }

        let key = format!("{}/{}", Self::TEMP_DIR, Uuid::new_v4());
        tokio::fs::write(self.path_for(&key), &bytes).await?;
        debug!(url = %url, key = %key, size = bytes.len(), "Downloaded input image");

        Ok(FileHandle {
            key,
            temporary: true,
        })
    }

    async fn open_stored(&self, key: &str) -> Result<FileHandle, FileStoreError> {
        match tokio::fs::metadata(self.path_for(key)).await {
            Ok(meta) if meta.is_file() => Ok(FileHandle {
                key: key.to_string(),
                temporary: false,
            }),
            Ok(_) => Err(FileStoreError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError> {
        let bytes = tokio::fs::read(self.path_for(&handle.key)).await?;
        if bytes.len() > self.max_bytes {
            return Err(FileStoreError::TooLarge(handle.key.clone(), self.max_bytes));
        }
        Ok(bytes)
    }

    async fn delete(&self, handle: &FileHandle) -> Result<(), FileStoreError> {
        if !handle.temporary {
            return Ok(());
        }
        match tokio::fs::remove_file(self.path_for(&handle.key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
