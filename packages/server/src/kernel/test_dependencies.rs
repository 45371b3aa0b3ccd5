// TestDependencies - in-memory wiring for tests
//
// Builds a JobOrchestrator over MemoryStore, the scripted generation adapter
// and MockFileStore, so lifecycle tests need no database or network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use generation_client::testing::MockGenerationAdapter;

use super::file_store::{FileHandle, FileStore, FileStoreError};
use super::memory_store::MemoryStore;
use super::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::domains::credits::CreditLedger;
use crate::domains::generation::models::ResultRetention;
use crate::domains::generation::{JobOrchestrator, JobStore, OrchestratorSettings};

// =============================================================================
// Mock File Store
// =============================================================================

/// File store backed by maps. Downloads become numbered temporary handles
/// that must be deleted again.
#[derive(Clone, Default)]
pub struct MockFileStore {
    remote: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    stored: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    temporary: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    fetched: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bytes` when `url` is fetched.
    pub fn with_url(self, url: &str, bytes: Vec<u8>) -> Self {
        self.remote.lock().unwrap().insert(url.to_string(), bytes);
        self
    }

    /// Pretend `key` was uploaded earlier.
    pub fn with_stored(self, key: &str, bytes: Vec<u8>) -> Self {
        self.stored.lock().unwrap().insert(key.to_string(), bytes);
        self
    }

    /// Temporary files not yet deleted.
    pub fn live_temporary_files(&self) -> usize {
        self.temporary.lock().unwrap().len()
    }

    pub fn has_stored(&self, key: &str) -> bool {
        self.stored.lock().unwrap().contains_key(key)
    }

    /// URLs fetched so far, in order.
    pub fn fetched_urls(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn fetch_by_url(&self, url: &str) -> Result<FileHandle, FileStoreError> {
        self.fetched.lock().unwrap().push(url.to_string());
        let bytes = self
            .remote
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FileStoreError::Download {
                url: url.to_string(),
                reason: "HTTP 404 Not Found".to_string(),
            })?;

        let mut temporary = self.temporary.lock().unwrap();
        let key = format!("tmp/{}", self.fetched.lock().unwrap().len());
        temporary.insert(key.clone(), bytes);
        Ok(FileHandle {
            key,
            temporary: true,
        })
    }

    async fn open_stored(&self, key: &str) -> Result<FileHandle, FileStoreError> {
        if !self.has_stored(key) {
            return Err(FileStoreError::NotFound(key.to_string()));
        }
        Ok(FileHandle {
            key: key.to_string(),
            temporary: false,
        })
    }

    async fn read(&self, handle: &FileHandle) -> Result<Vec<u8>, FileStoreError> {
        let source = if handle.temporary {
            &self.temporary
        } else {
            &self.stored
        };
        source
            .lock()
            .unwrap()
            .get(&handle.key)
            .cloned()
            .ok_or_else(|| FileStoreError::NotFound(handle.key.clone()))
    }

    async fn delete(&self, handle: &FileHandle) -> Result<(), FileStoreError> {
        if handle.temporary {
            self.temporary.lock().unwrap().remove(&handle.key);
            self.deleted.lock().unwrap().push(handle.key.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Test wiring
// =============================================================================

pub struct TestDependencies {
    pub store: Arc<MemoryStore>,
    /// Job store handed to the orchestrator instead of `store`
    pub jobs: Option<Arc<dyn JobStore>>,
    pub adapter: MockGenerationAdapter,
    pub files: MockFileStore,
    pub retention: ResultRetention,
    pub pool_config: WorkerPoolConfig,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            jobs: None,
            adapter: MockGenerationAdapter::new(),
            files: MockFileStore::new(),
            retention: ResultRetention::default(),
            pool_config: WorkerPoolConfig {
                concurrency: 2,
                queue_capacity: 8,
                drain_timeout: Duration::from_secs(5),
            },
        }
    }

    pub fn with_adapter(mut self, adapter: MockGenerationAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Route job persistence through `jobs`; credits stay on `store`.
    pub fn with_jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn with_files(mut self, files: MockFileStore) -> Self {
        self.files = files;
        self
    }

    pub fn with_retention(mut self, retention: ResultRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_pool_config(mut self, config: WorkerPoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Wire everything up. Must be called inside a tokio runtime.
    pub fn build(self) -> TestKernel {
        let ledger = CreditLedger::new(self.store.clone());
        let pool = Arc::new(WorkerPool::start(self.pool_config));
        let jobs: Arc<dyn JobStore> = match self.jobs {
            Some(jobs) => jobs,
            None => self.store.clone(),
        };
        let orchestrator = JobOrchestrator::builder()
            .jobs(jobs)
            .ledger(ledger.clone())
            .adapter(Arc::new(self.adapter.clone()))
            .files(Arc::new(self.files.clone()))
            .pool(pool.clone())
            .settings(OrchestratorSettings {
                retention: self.retention,
                ..OrchestratorSettings::default()
            })
            .build();

        TestKernel {
            orchestrator,
            ledger,
            store: self.store,
            adapter: self.adapter,
            files: self.files,
            pool,
        }
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}

/// Handles to everything a lifecycle test wants to poke at.
pub struct TestKernel {
    pub orchestrator: JobOrchestrator,
    pub ledger: CreditLedger,
    pub store: Arc<MemoryStore>,
    pub adapter: MockGenerationAdapter,
    pub files: MockFileStore,
    pub pool: Arc<WorkerPool>,
}

impl TestKernel {
    /// Run every queued background job to completion.
    pub async fn settle(&self) {
        self.pool.shutdown().await;
    }
}
