//! Credit administration CLI
//!
//! Grants credits and inspects balances and ledger history. Output is JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use server_core::common::OwnerId;
use server_core::domains::credits::{CreditLedger, CreditTransaction, PostgresCreditStore};
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "credits")]
#[command(about = "Grant and inspect generation credits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add credits to an owner's balance
    Grant {
        owner: Uuid,
        #[arg(long, default_value_t = 1)]
        amount: i64,
    },

    /// Show an owner's balance
    Balance { owner: Uuid },

    /// Show an owner's most recent ledger entries
    History {
        owner: Uuid,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[derive(Serialize)]
struct BalanceResponse {
    owner_id: OwnerId,
    balance: i64,
}

#[derive(Serialize)]
struct HistoryResponse {
    owner_id: OwnerId,
    transactions: Vec<CreditTransaction>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let ledger = CreditLedger::new(Arc::new(PostgresCreditStore::new(pool.clone())));

    let output = match cli.command {
        Commands::Grant { owner, amount } => {
            let owner_id = OwnerId::from_uuid(owner);
            let account = ledger.credit(owner_id, amount).await?;
            serde_json::to_string_pretty(&BalanceResponse {
                owner_id,
                balance: account.balance,
            })?
        }
        Commands::Balance { owner } => {
            let owner_id = OwnerId::from_uuid(owner);
            let balance = ledger.balance(owner_id).await?;
            serde_json::to_string_pretty(&BalanceResponse { owner_id, balance })?
        }
        Commands::History { owner, limit } => {
            let owner_id = OwnerId::from_uuid(owner);
            let transactions = ledger.transactions(owner_id, limit).await?;
            serde_json::to_string_pretty(&HistoryResponse {
                owner_id,
                transactions,
            })?
        }
    };

    println!("{}", output);
    pool.close().await;
    Ok(())
}
