use anyhow::{Context, Result};
use axum::{Router, routing::get};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod handlers;
mod metrics;
mod ws;

use crate::config::RelayConfig;
use crate::metrics::ServerMetrics;
use ollama_stream::OllamaClient;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "Streaming chat relay between WebSocket clients and Ollama")]
struct Cli {
    /// Port for the web server
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Custom data directory (defaults to ~/.chat-relay)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Upstream generation client, shared by all sessions
    pub client: OllamaClient,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/ws", get(handlers::chat_websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn build_state(config: RelayConfig) -> Result<AppState> {
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.upstream.connect_timeout_secs))
        .build()
        .context("building upstream HTTP client")?;
    let client =
        OllamaClient::with_http_client(http, config.upstream.url, config.upstream.model);

    Ok(AppState {
        client,
        metrics: Arc::new(ServerMetrics::new()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "chat_relay=debug,tower_http=debug,info"
    } else {
        "chat_relay=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = RelayConfig::load(cli.data_dir, cli.host, cli.port)?;
    info!(
        "Starting chat relay (upstream {} model {})",
        config.upstream.url, config.upstream.model
    );

    let addr = format!("{}:{}", config.server.host, config.server.port)
        .parse::<SocketAddr>()
        .context("invalid listen address")?;
    let state = build_state(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let actual_addr = listener.local_addr()?;
    info!("Chat relay listening on http://{}", actual_addr);
    info!("WebSocket endpoint: ws://{}/api/chat/ws", actual_addr);

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}
