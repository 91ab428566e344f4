use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::error;

use crate::AppState;
use crate::models::ChatMessage;

/// Raw query string. `limit` stays textual so junk falls back instead of rejecting.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub channel: Option<String>,
    pub limit: Option<String>,
}

/// `GET /api/history?channel=&limit=` - recent messages, oldest first
pub async fn history_handler(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, (StatusCode, &'static str)> {
    let policy = &state.config.history;
    let channel = policy.resolve_channel(query.channel.as_deref());
    let limit = policy.resolve_limit(query.limit.as_deref());

    state.store.recent(&channel, limit).await.map(Json).map_err(|e| {
        error!("Failed to load history for {}: {:#}", channel, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to load history")
    })
}
