//! # HTTP Server
//!
//! Combines the health and query routers behind CORS and request tracing.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::routes::{health_routes, query_routes};
use crate::gateway::Gateway;
use crate::{Result, SqlGateError};

pub struct HttpServer {
    socket_addr: String,
    router: Router,
}

impl HttpServer {
    pub fn new(socket_addr: impl Into<String>, cors_origins: &[String], gateway: Arc<Gateway>) -> Self {
        HttpServer {
            socket_addr: socket_addr.into(),
            router: build_router(cors_origins, gateway),
        }
    }

    pub fn socket_addr(&self) -> &str {
        &self.socket_addr
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until Ctrl-C
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self
            .socket_addr
            .parse()
            .map_err(|e| SqlGateError::Config(format!("invalid listen address {}: {}", self.socket_addr, e)))?;

        let listener = TcpListener::bind(addr).await?;
        info!("HTTP server listening on {}", addr);

        axum::serve(listener, self.router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the combined router
pub fn build_router(cors_origins: &[String], gateway: Arc<Gateway>) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(query_routes(gateway))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        // No origins configured: allow everything
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<_> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
