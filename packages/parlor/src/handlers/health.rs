use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics;

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let status = if state.db.ping().await {
        "healthy"
    } else {
        "degraded"
    };

    Json(metrics::HealthStatus {
        status: status.to_string(),
        chat_connections: snapshot.chat.active,
        signaling_peers: snapshot.signaling.active,
        uptime_secs: snapshot.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness probe - returns 200 once the message store answers
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    if state.db.ping().await {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected"
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_probes_report_ready() {
        let state = crate::test_helpers::test_app_state().await;
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(health_live_handler))
            .route("/health/ready", get(health_ready_handler))
            .with_state(state);

        let (status, json) = get_json(app.clone(), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "alive");

        let (status, json) = get_json(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["database"], "connected");

        let (_, json) = get_json(app, "/health").await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["chat_connections"], 0);
    }

    #[tokio::test]
    async fn test_ready_fails_without_database() {
        let state = crate::test_helpers::test_app_state().await;
        state.db.pool.close().await;
        let app = Router::new()
            .route("/health/ready", get(health_ready_handler))
            .with_state(state);

        let (status, json) = get_json(app, "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let state = crate::test_helpers::test_app_state().await;
        state.metrics.relay_delivered();
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(state);

        let (_, json) = get_json(app, "/metrics").await;
        assert_eq!(json["signaling"]["relays_delivered"], 1);
    }
}
