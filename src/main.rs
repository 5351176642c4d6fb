use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use sqlgate::Gateway;
use sqlgate::config::Config;
use sqlgate::http::HttpServer;
use sqlgate::rate_limit::RequestThrottle;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.clone())
        .init();

    info!("sqlgate v{}", env!("CARGO_PKG_VERSION"));

    let (gateway, pool, limiter) =
        Gateway::from_config(&config).map_err(|e| anyhow::anyhow!("Failed to start gateway: {}", e))?;

    info!("Using rate limit: {} ({})", config.rate_limit, limiter.quota());
    info!(
        "Pool size {}, checkout timeout {}s, JSON endpoint {}",
        config.pool_size,
        config.pool_timeout,
        if config.throttle_json_endpoint { "throttled" } else { "unthrottled" }
    );

    // Periodic status line and expired-window sweep
    let status_interval = config.status_log_interval_duration();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(status_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            let swept = limiter.sweep();
            let stats = pool.stats();
            info!(
                "Pool: {} in use, {} idle of {} (opened {}, discarded {}, checkouts {}, ping failures {}); limiter: {} windows, {} swept",
                stats.in_use,
                stats.idle,
                stats.max_size,
                stats.opened,
                stats.discarded,
                stats.checkouts,
                stats.ping_failures,
                limiter.tracked(),
                swept
            );
        }
    });

    let server = HttpServer::new(config.socket_addr(), &config.cors_origins, Arc::new(gateway));
    info!("Health check: http://{}/", server.socket_addr());
    server.start().await?;

    Ok(())
}
