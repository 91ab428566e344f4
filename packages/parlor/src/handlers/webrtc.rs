use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::config::IceConfig;

/// One entry of `RTCConfiguration.iceServers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcConfigResponse {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

impl From<&IceConfig> for WebRtcConfigResponse {
    fn from(ice: &IceConfig) -> Self {
        let mut ice_servers = Vec::new();
        if !ice.stun_urls.is_empty() {
            ice_servers.push(IceServer {
                urls: ice.stun_urls.clone(),
                username: None,
                credential: None,
            });
        }
        if let Some(turn) = &ice.turn {
            ice_servers.push(IceServer {
                urls: vec![
                    format!("turn:{}:{}?transport=udp", turn.host, turn.port),
                    format!("turn:{}:{}?transport=tcp", turn.host, turn.port),
                ],
                username: Some(turn.username.clone()),
                credential: Some(turn.password.clone()),
            });
        }
        Self { ice_servers }
    }
}

/// `GET /api/webrtc-config` - ICE servers for `RTCPeerConnection`
pub async fn webrtc_config_handler(State(state): State<AppState>) -> Json<WebRtcConfigResponse> {
    Json(WebRtcConfigResponse::from(&state.config.ice))
}
