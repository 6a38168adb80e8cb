//! HTTP server implementation using Axum.

use crate::handler::{handle_health, handle_rpc};
use crate::logs::LogHistory;
use axum::{
    routing::{get, post},
    Router,
};
use conductor_core::config::EventConfig;
use conductor_core::Conductor;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Requests served at once; further requests wait for a slot.
pub const MAX_CONCURRENT_REQUESTS: usize = 32;

/// Application state shared across handlers.
pub struct AppState {
    pub conductor: Arc<Conductor>,
    /// Recent narration lines, fed from the conductor's event channel.
    pub logs: LogHistory,
}

impl AppState {
    /// Wrap a conductor and start collecting its log lines.
    pub fn new(conductor: Arc<Conductor>) -> Self {
        let logs = LogHistory::new(EventConfig::LOG_HISTORY);
        logs.collect_from(conductor.subscribe());
        Self { conductor, logs }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/rpc", post(handle_rpc))
        .layer(cors)
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .with_state(state)
}

/// Start the JSON-RPC HTTP server.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(
    conductor: Arc<Conductor>,
    host: &str,
    port: u16,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(Arc::new(AppState::new(conductor)));

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Server error: {}", e);
        }
    });

    Ok(actual_addr)
}
