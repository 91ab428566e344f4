//! WebSocket hubs
//!
//! Two independent fan-out points, each owned by a single control task:
//! - [`ChatHub`] broadcasts chat and presence to every `/ws` connection and persists chat
//! - [`SignalingHub`] assigns peer ids on `/ws/voice` and relays WebRTC negotiation
//!
//! Connections never touch hub state directly. They send commands through a
//! cloneable handle and receive envelopes through a bounded [`Outbox`].

mod chat;
mod connection;
mod signaling;

pub use chat::{ChatEnvelope, ChatHub, ChatHubHandle, ChatInbound, serve_chat};
pub use connection::{ConnId, DeliveryError, Outbox, ReadEnd, outbound_queue, pump};
pub use signaling::{
    Negotiation, PeerId, SignalEnvelope, SignalingHub, SignalingHubHandle, serve_signaling,
};

/// Returned by hub handles once the control task has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("{0} hub is no longer running")]
    Closed(&'static str),
}
