use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use parlor::config::{FileConfig, ParlorConfig, ServerConfig, load_config};
use parlor::db::Database;
use parlor::metrics::ServerMetrics;
use parlor::{AppState, router};

/// Custom span maker that includes a unique request ID for correlation
#[derive(Clone, Debug)]
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
#[command(name = "parlor")]
#[command(about = "Group chat and WebRTC signaling server")]
struct Cli {
    /// Data directory holding chat.db and config.toml (defaults to ./data)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "parlor=debug,tower_http=debug,info"
    } else {
        "parlor=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let (text_layer, json_layer) = if cli.json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };
    tracing_subscriber::registry()
        .with(text_layer)
        .with(json_layer)
        .with(env_filter)
        .init();

    let paths = ParlorConfig::new(cli.data_dir)?;
    let file_config: FileConfig = load_config(&paths.data_dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", paths.config_toml_path().display()))?;

    let mut server_config = ServerConfig::from_file(&file_config);
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    if server_config.ice.turn.is_some() {
        info!("TURN relay configured");
    }

    let db = Database::new(&paths).await?;
    let metrics = Arc::new(ServerMetrics::new());

    let addr = format!("{}:{}", server_config.host, server_config.port)
        .parse::<SocketAddr>()
        .context("Invalid listen address")?;
    let static_dir = server_config.static_dir.clone();

    let state = AppState::new(server_config, db, metrics);
    let app = router(state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("Parlor listening on http://{}", actual_addr);
    info!("Static files from {}", static_dir.display());
    info!("  WS     /ws                  - Chat");
    info!("  WS     /ws/voice            - WebRTC signaling");
    info!("  GET    /api/history         - Recent messages");
    info!("  GET    /api/webrtc-config   - ICE servers");

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}
