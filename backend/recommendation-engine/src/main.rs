use anyhow::Context;
use recommendation_engine::{
    config::LogFormat, jobs::run_evaluation_job, CatalogStore, Config, PgCatalogStore,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config
    let config = Config::from_env().context("failed to load config")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.service.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }

    config.validate().context("invalid configuration")?;

    info!(
        "Starting {} evaluation (metrics window {}d, bias window {}d)",
        config.service.service_name,
        config.evaluation.metrics_window_days,
        config.evaluation.bias_window_days
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .context("failed to connect to database")?;

    let store: Arc<dyn CatalogStore> = Arc::new(PgCatalogStore::new(pool));

    run_evaluation_job(store, &config).await.map_err(|e| {
        error!("Evaluation job failed: {:#}", e);
        e
    })
}
