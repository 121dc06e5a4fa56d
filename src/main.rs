use seller_kpi::application::actors::{spawn_recompute_actor, RecomputeMessage};
use seller_kpi::application::services::kpi_service::KpiService;
use seller_kpi::config::KpiConfig;
use seller_kpi::infrastructure::lru_cache::LruKpiCache;
use seller_kpi::persistence::record_repository::SqliteRecordStore;
use seller_kpi::persistence::rollup_repository::SqliteRollupStore;
use seller_kpi::persistence::{init_database, DatabaseConfig};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env file is the normal production case
        if !e.not_found() {
            eprintln!("Failed to load .env file: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seller_kpi=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Seller KPI engine starting...");

    let db_config = DatabaseConfig::from_env();
    let config = KpiConfig::from_env();

    let pool = init_database(&db_config).await?;
    let service = Arc::new(KpiService::new(
        Arc::new(SqliteRecordStore::new(pool.clone())),
        Arc::new(SqliteRollupStore::new(pool.clone())),
        Arc::new(LruKpiCache::new(config.cache_capacity)),
        config.clone(),
    ));

    let (msg_tx, mut outcomes, actor) =
        spawn_recompute_actor(service, &config, Some(config.refresh_interval()));

    info!(
        "Refreshing today and yesterday every {:?} ({} workers)",
        config.refresh_interval(),
        config.worker_concurrency
    );

    let reporter = tokio::spawn(async move {
        while let Some(outcome) = outcomes.recv().await {
            match outcome.result {
                Ok(report) => info!(
                    brand_id = report.brand_id,
                    date = %report.date,
                    rows_written = report.rows_written,
                    rows_deleted = report.rows_deleted,
                    "✓ Rollup refreshed"
                ),
                Err(e) => error!(
                    brand_id = outcome.brand_id,
                    date = %outcome.date,
                    attempts = outcome.attempts,
                    "✗ Rollup refresh failed: {}",
                    e
                ),
            }
        }
    });

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down gracefully...");
    if msg_tx.send(RecomputeMessage::Shutdown).await.is_err() {
        warn!("Recompute actor already stopped");
    }
    if let Err(e) = actor.await {
        error!("Recompute actor task failed: {}", e);
    }
    if let Err(e) = reporter.await {
        error!("Outcome reporter task failed: {}", e);
    }
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}
