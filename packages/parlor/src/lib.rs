//! Parlor: group chat fan-out and WebRTC signaling relay over WebSockets.

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::services::ServeDir;

pub mod config;
pub mod db;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod store;
pub mod views;
pub mod ws;

#[cfg(test)]
mod test_helpers;

use config::ServerConfig;
use db::Database;
use metrics::ServerMetrics;
use store::MessageStore;
use ws::{ChatHub, ChatHubHandle, SignalingHub, SignalingHubHandle};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Arc<Database>,
    pub store: MessageStore,
    pub chat: ChatHubHandle,
    pub signaling: SignalingHubHandle,
    pub metrics: Arc<ServerMetrics>,
}

impl AppState {
    /// Wire up the store and spawn both hub control tasks. Each hub runs until
    /// the last clone of this state is dropped.
    pub fn new(config: ServerConfig, db: Database, metrics: Arc<ServerMetrics>) -> Self {
        let store = MessageStore::new(db.pool.clone());

        let (chat_hub, chat) = ChatHub::new(store.clone(), metrics.clone());
        tokio::spawn(chat_hub.run());

        let (signaling_hub, signaling) = SignalingHub::new(metrics.clone());
        tokio::spawn(signaling_hub.run());

        Self {
            config: Arc::new(config),
            db: Arc::new(db),
            store,
            chat,
            signaling,
            metrics,
        }
    }
}

/// Every route the server exposes. Tracing and CORS layers are added by the binary.
pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(views::index_page))
        .route("/ws", get(handlers::chat_websocket_handler))
        .route("/ws/voice", get(handlers::signaling_websocket_handler))
        .route("/api/history", get(handlers::history_handler))
        .route("/api/webrtc-config", get(handlers::webrtc_config_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .nest_service("/static", static_files)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let app = router(test_helpers::test_app_state().await);
        let resp = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_routes_require_upgrade() {
        let app = router(test_helpers::test_app_state().await);
        for uri in ["/ws", "/ws/voice"] {
            let resp = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert!(resp.status().is_client_error(), "{} -> {}", uri, resp.status());
        }
    }

    #[tokio::test]
    async fn test_static_files_are_served() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app.js"), "console.log(1)").unwrap();

        let mut config = ServerConfig::from_file(&config::FileConfig::default());
        config.static_dir = tmp.path().to_path_buf();
        let app = router(test_helpers::test_app_state_with(config).await);

        let resp = app
            .oneshot(
                Request::builder()
                    .uri("/static/app.js")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
