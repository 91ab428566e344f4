pub mod health;
pub mod history;
pub mod webrtc;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use history::history_handler;
pub use webrtc::webrtc_config_handler;
pub use websocket::{chat_websocket_handler, signaling_websocket_handler};
