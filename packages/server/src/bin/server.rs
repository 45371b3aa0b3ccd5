//! Generation Studio server
//!
//! Boots the kernel (database, migrations, worker pool, generation client)
//! and keeps it running until Ctrl-C, then drains background jobs and shuts
//! down.

use anyhow::{Context, Result};
use server_core::kernel::ServerKernel;
use server_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Generation Studio server");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        text_model = %config.generation_text_model,
        image_model = %config.generation_image_model,
        workers = config.worker_concurrency,
        queue = config.worker_queue_capacity,
        retention = ?config.result_retention,
        "Configuration loaded"
    );

    let kernel = ServerKernel::build(&config).await?;
    tracing::info!("Server kernel ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, draining background jobs");

    kernel.shutdown().await;
    Ok(())
}
