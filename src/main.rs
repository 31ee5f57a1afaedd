use std::sync::Arc;

use anyhow::Context;

use jobmill::config::ConfigLoader;
use jobmill::db::{establish_async_connection_pool, run_migrations};
use jobmill::jobs::{ExecutorRegistry, JobEngine};
use jobmill::logger::init_logger;
use jobmill::notify::{NoopSink, StatusSink, WebhookSink};
use jobmill::store::PgJobStore;

/// Executor wiring point. Deployments embedding the engine register their
/// job types here.
fn build_registry() -> anyhow::Result<ExecutorRegistry> {
    let registry = ExecutorRegistry::new();
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loader = ConfigLoader::new().context("failed to initialize configuration loader")?;
    let settings = loader.load().context("failed to load configuration")?;

    init_logger(&settings.logging).context("failed to initialize logger")?;

    tracing::info!(
        name = %settings.application.name,
        version = %settings.application.version,
        environment = %loader.environment(),
        "starting"
    );

    if settings.database.auto_migrate {
        run_migrations(&settings.database)
            .await
            .context("failed to run database migrations")?;
        tracing::info!("database migrations applied");
    }

    let pool = establish_async_connection_pool(&settings.database)
        .await
        .context("failed to create database connection pool")?;
    let store = Arc::new(PgJobStore::new(pool));

    let registry = build_registry()?;
    if registry.is_empty() {
        tracing::warn!("no job executors registered; submissions will be rejected");
    } else {
        tracing::info!(executors = registry.len(), "job executors registered");
    }

    let sink: Arc<dyn StatusSink> = match settings.notifications.webhook.clone() {
        Some(config) => {
            tracing::info!(url = %config.url, "pushing job updates to webhook");
            Arc::new(WebhookSink::new(config).context("failed to build webhook sink")?)
        }
        None => Arc::new(NoopSink),
    };

    let engine = JobEngine::new(store, registry, sink, settings.engine.clone());
    engine.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    engine.shutdown().await;
    Ok(())
}
