use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use tracing::warn;

use crate::AppState;
use crate::ws;

/// `GET /ws` - upgrade into a chat connection
pub async fn chat_websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.chat.clone();
    let limits = state.config.chat.clone();

    ws.max_message_size(limits.max_message_bytes)
        .max_frame_size(limits.max_message_bytes)
        .on_failed_upgrade(|e| warn!("Chat upgrade failed: {}", e))
        .on_upgrade(move |socket| ws::serve_chat(socket, hub, limits))
}

/// `GET /ws/voice` - upgrade into a signaling peer
pub async fn signaling_websocket_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.signaling.clone();
    let limits = state.config.signaling.clone();

    ws.max_message_size(limits.max_message_bytes)
        .max_frame_size(limits.max_message_bytes)
        .on_failed_upgrade(|e| warn!("Signaling upgrade failed: {}", e))
        .on_upgrade(move |socket| ws::serve_signaling(socket, hub, limits))
}
