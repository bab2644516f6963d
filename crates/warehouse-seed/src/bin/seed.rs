//! Seeds the warehouse database.
//!
//! Run with:
//! ```
//! DATABASE_URL=postgres://... cargo run -p warehouse-seed --bin seed
//! ```
//!
//! Set `SEED_FILE` to load a JSON seed document instead of the built-in
//! example set. Exits non-zero if the run fails or validation finds problems.

use std::process::ExitCode;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use warehouse_seed::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LoaderConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    tracing::info!("Connected to database");

    let store = PgStore::new(pool);
    let declared = warehouse();
    let catalog = if config.introspect {
        let schemas: Vec<&str> = config.schemas.iter().map(String::as_str).collect();
        let mut introspected = store.introspect(&schemas).await?;
        introspected.adopt_aliases(&declared);
        tracing::info!("Introspected {} tables", introspected.len());
        introspected
    } else {
        declared
    };

    let seeds = match &config.seed_file {
        Some(path) => SeedSet::from_path(path, &catalog, config.default_policy)?,
        None => SeedSet::builtin(&catalog, config.default_policy)?,
    };

    let mut loader =
        SeedLoader::new(store, catalog).with_transaction_scope(config.transaction_scope);
    let report = match loader.run(&seeds).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("Seed failed: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    // Summary output
    tracing::info!("Load order: {}", report.order.join(" -> "));
    for batch in &report.batches {
        tracing::info!(
            "  {}: {} inserted, {} skipped, {} updated",
            batch.entity,
            batch.inserted,
            batch.skipped,
            batch.updated
        );
    }
    println!("{}", serde_json::to_string_pretty(&report.validation)?);

    if report.is_clean() {
        tracing::info!("Seed completed!");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("Validation found {} problems", report.validation.len());
        Ok(ExitCode::FAILURE)
    }
}
