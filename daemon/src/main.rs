//! Ratekeeper Daemon
//!
//! Keeps every configured source warm by refreshing it on a fixed interval
//! and logs the resulting quotes and health.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratekeeper_engine::{EngineConfig, RateEngine, RateResponse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let instance_id = format!("ratekeeper-{}", uuid::Uuid::new_v4());
    info!(instance_id = %instance_id, "Starting Ratekeeper");

    // Load configuration
    let config = EngineConfig::from_env()?;
    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(anyhow::anyhow!("Configuration error: {}", e));
    }

    let engine = Arc::new(RateEngine::from_config(&config)?);
    info!(
        sources = ?engine.source_names(),
        refresh_interval_secs = config.refresh_interval.as_secs(),
        success_ttl_secs = config.success_ttl.as_secs(),
        "Engine ready"
    );

    let refresher = tokio::spawn(refresh_loop(engine.clone(), config.refresh_interval));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    refresher.abort();

    info!(metrics = ?engine.metrics(), "Ratekeeper shutdown complete");
    Ok(())
}

/// Refresh every source, then log the health report and counters.
async fn refresh_loop(engine: Arc<RateEngine>, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        for name in engine.source_names() {
            match engine.refresh(&name).await {
                Ok(quote) => {
                    let response = RateResponse::from(&quote);
                    match serde_json::to_string(&response) {
                        Ok(json) => info!(source = %name, response = %json, "Rate refreshed"),
                        Err(e) => warn!(source = %name, error = %e, "Failed to encode response"),
                    }
                }
                Err(e) => error!(source = %name, error = %e, "Refresh failed"),
            }
        }

        let report = engine.health_report();
        if report.healthy {
            info!(scrapers = report.scraper_count, "All sources healthy");
        } else {
            let json = serde_json::to_string(&report).unwrap_or_default();
            warn!(report = %json, "Degraded sources");
        }

        let cache = engine.cache_stats();
        info!(
            metrics = ?engine.metrics(),
            fresh_entries = cache.fresh_entries,
            last_known_good_entries = cache.last_known_good_entries,
            "Refresh cycle complete"
        );
    }
}
