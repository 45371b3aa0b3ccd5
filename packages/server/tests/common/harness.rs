//! Test harness with testcontainers for integration testing.
//!
//! Uses one shared Postgres container across all tests. The container and
//! migrations are initialized on the first test, then reused.

use anyhow::{Context, Result};
use generation_client::testing::MockGenerationAdapter;
use server_core::domains::credits::{CreditLedger, PostgresCreditStore};
use server_core::domains::generation::{JobOrchestrator, OrchestratorSettings, PostgresJobStore};
use server_core::kernel::{MockFileStore, WorkerPool, WorkerPoolConfig};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    db_url: String,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            pg_host, pg_port
        );

        // Run migrations once on the shared database
        let pool = PgPool::connect(&db_url)
            .await
            .context("Failed to connect to Postgres for migrations")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Test harness backed by the shared Postgres container.
///
/// Tests isolate themselves by using fresh owner ids, so no cleanup is needed
/// between tests.
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let jobs = ctx.jobs();
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_pool = PgPool::connect(&infra.db_url)
            .await
            .context("Failed to connect to test database")?;

        Ok(Self { db_pool })
    }

    pub fn jobs(&self) -> Arc<PostgresJobStore> {
        Arc::new(PostgresJobStore::new(self.db_pool.clone()))
    }

    pub fn credits(&self) -> Arc<PostgresCreditStore> {
        Arc::new(PostgresCreditStore::new(self.db_pool.clone()))
    }

    pub fn ledger(&self) -> CreditLedger {
        CreditLedger::new(self.credits())
    }

    /// Orchestrator over the real stores with scripted backend and files.
    pub fn orchestrator(
        &self,
        adapter: MockGenerationAdapter,
        files: MockFileStore,
    ) -> (JobOrchestrator, Arc<WorkerPool>) {
        let pool = Arc::new(WorkerPool::start(WorkerPoolConfig {
            concurrency: 2,
            queue_capacity: 8,
            drain_timeout: Duration::from_secs(10),
        }));
        let orchestrator = JobOrchestrator::builder()
            .jobs(self.jobs())
            .ledger(self.ledger())
            .adapter(Arc::new(adapter))
            .files(Arc::new(files))
            .pool(pool.clone())
            .settings(OrchestratorSettings::default())
            .build();
        (orchestrator, pool)
    }
}
