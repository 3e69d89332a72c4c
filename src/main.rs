use std::sync::Arc;
use std::time::Duration;

use portdesk::{
    allocation::{engine::AllocationEngine, repository_sqlx::SqlxAllocationRepository},
    availability::AvailabilityQuery,
    config::AppConfig,
    db::Db,
    logger::init_tracing,
    metrics::counters::Counters,
    notify::{CapacityNotifier, NoopNotifier, WebhookNotifier},
    port::repository_sqlx::SqlxPortRepository,
    subscription::repository_sqlx::SqlxSubscriptionRepository,
};

/// Initializes DB, runs migrations, and wires the allocation services.
async fn init_engine(cfg: &AppConfig) -> anyhow::Result<(Arc<AllocationEngine>, AvailabilityQuery)> {
    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;

    let ports = Arc::new(SqlxPortRepository::new(db.pool()));
    let subscriptions = Arc::new(SqlxSubscriptionRepository::new(db.pool()));
    let allocations = Arc::new(SqlxAllocationRepository::new(db.pool()));

    let notifier: Arc<dyn CapacityNotifier> = match &cfg.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), cfg.notify_cooldown_ms)?),
        None => Arc::new(NoopNotifier),
    };

    let engine = Arc::new(AllocationEngine::new(
        allocations,
        ports.clone(),
        subscriptions,
        notifier,
        Counters::default(),
        cfg.alloc_max_candidates,
    ));

    Ok((engine, AvailabilityQuery::new(ports)))
}

/// Starts the reconciliation loop that reclaims ports from expired and
/// cancelled subscriptions.
fn start_sweeper_loop(engine: Arc<AllocationEngine>, interval: Duration, batch: usize) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            match engine.sweep_expired(batch).await {
                Ok(0) => {}
                Ok(released) => tracing::info!(released, "sweep pass reclaimed ports"),
                Err(e) => tracing::error!(error = ?e, "sweep pass failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting portdesk backend...");

    let cfg = AppConfig::from_env();

    let (engine, availability) = init_engine(&cfg).await?;

    start_sweeper_loop(
        engine,
        Duration::from_millis(cfg.sweep_interval_ms),
        cfg.sweep_batch_size,
    );

    tracing::info!(
        available = availability.available_count().await?,
        "port pool ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    Ok(())
}
