// ServerKernel - core infrastructure with all dependencies
//
// Holds the database pool, the worker pool and the services built on top of
// them. Everything is behind traits so tests can swap in TestDependencies.

use std::sync::Arc;

use anyhow::{Context, Result};
use generation_client::{
    ApiKey, AppIdentity, ClientSettings, GenerationAdapter, GenerationClient, ImageOptions,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use super::file_store::{FileStore, LocalFileStore};
use super::worker_pool::{WorkerPool, WorkerPoolConfig};
use crate::config::Config;
use crate::domains::credits::{CreditLedger, PostgresCreditStore};
use crate::domains::generation::{JobOrchestrator, OrchestratorSettings, PostgresJobStore};

/// ServerKernel holds all server dependencies
pub struct ServerKernel {
    pub db_pool: PgPool,
    pub ledger: CreditLedger,
    pub orchestrator: JobOrchestrator,
    pub worker_pool: Arc<WorkerPool>,
}

impl ServerKernel {
    /// Connect to the database, run migrations and wire the services.
    pub async fn build(config: &Config) -> Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run migrations")?;
        info!("Migrations applied");

        let files: Arc<dyn FileStore> = Arc::new(
            LocalFileStore::new(&config.file_store_dir, config.file_max_bytes)
                .await
                .context("Failed to prepare file store")?,
        );

        let adapter = generation_adapter(config);
        if adapter.ensure_configured().is_err() {
            warn!("GENERATION_API_KEY is not set; starting jobs will fail until it is configured");
        }

        let worker_pool = Arc::new(WorkerPool::start(WorkerPoolConfig {
            concurrency: config.worker_concurrency,
            queue_capacity: config.worker_queue_capacity,
            ..Default::default()
        }));

        let ledger = CreditLedger::new(Arc::new(PostgresCreditStore::new(db_pool.clone())));
        let orchestrator = JobOrchestrator::builder()
            .jobs(Arc::new(PostgresJobStore::new(db_pool.clone())))
            .ledger(ledger.clone())
            .adapter(adapter)
            .files(files)
            .pool(worker_pool.clone())
            .settings(OrchestratorSettings {
                text_model: config.generation_text_model.clone(),
                image_model: config.generation_image_model.clone(),
                retention: config.result_retention,
                lease: config.job_lease,
            })
            .build();

        Ok(Self {
            db_pool,
            ledger,
            orchestrator,
            worker_pool,
        })
    }

    /// Drain background work, then close the database pool.
    pub async fn shutdown(self) {
        self.worker_pool.shutdown().await;
        self.db_pool.close().await;
        info!("Server kernel shut down");
    }
}

fn generation_adapter(config: &Config) -> Arc<dyn GenerationAdapter> {
    let mut settings = ClientSettings::new(config.generation_api_key.clone().map(ApiKey::new))
        .with_timeout(config.generation_timeout)
        .with_identity(AppIdentity {
            name: config.generation_app_name.clone(),
            url: config.generation_app_url.clone(),
        })
        .with_image_options(ImageOptions {
            max_dimension: config.image_max_dimension,
            jpeg_quality: config.image_jpeg_quality,
        });
    if let Some(url) = &config.generation_base_url {
        settings = settings.with_base_url(url.as_str());
    }
    Arc::new(GenerationClient::new(settings))
}
