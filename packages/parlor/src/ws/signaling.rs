//! WebRTC signaling relay
//!
//! Peers on `/ws/voice` get a server-assigned id and a roster snapshot on join,
//! then exchange offers, answers and ICE candidates by addressing each other
//! with `to`. The hub stamps `from` and forwards; payloads are never inspected.

use axum::extract::ws::WebSocket;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::HubError;
use super::connection::{Outbox, outbound_queue, pump};
use crate::config::ConnectionLimits;
use crate::metrics::ServerMetrics;

/// Relay address of a signaling peer, rendered as `peer-<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

impl FromStr for PeerId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("peer-")
            .and_then(|n| n.parse().ok())
            .map(PeerId)
            .ok_or(())
    }
}

/// Payload of a relayable envelope. `sdp` and `candidate` pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Negotiation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default)]
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalEnvelope {
    Welcome { id: String, peers: Vec<String> },
    PeerJoined { id: String },
    PeerLeft { id: String },
    Offer(Negotiation),
    Answer(Negotiation),
    Candidate(Negotiation),
}

impl SignalEnvelope {
    fn negotiation_mut(&mut self) -> Option<&mut Negotiation> {
        match self {
            Self::Offer(n) | Self::Answer(n) | Self::Candidate(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug)]
enum SignalCommand {
    Register {
        outbox: Outbox<SignalEnvelope>,
        respond_to: oneshot::Sender<PeerId>,
    },
    Unregister {
        peer: PeerId,
    },
    Relay {
        from: PeerId,
        envelope: SignalEnvelope,
    },
}

#[derive(Debug, Clone)]
pub struct SignalingHubHandle {
    commands: mpsc::UnboundedSender<SignalCommand>,
}

impl SignalingHubHandle {
    /// Join the peer set. Resolves to the id assigned by the hub; the welcome
    /// envelope is already queued on `outbox` by then.
    pub async fn register(&self, outbox: Outbox<SignalEnvelope>) -> Result<PeerId, HubError> {
        let (respond_to, rx) = oneshot::channel();
        self.send(SignalCommand::Register { outbox, respond_to })?;
        rx.await.map_err(|_| HubError::Closed("signaling"))
    }

    pub fn unregister(&self, peer: PeerId) -> Result<(), HubError> {
        self.send(SignalCommand::Unregister { peer })
    }

    pub fn relay(&self, from: PeerId, envelope: SignalEnvelope) -> Result<(), HubError> {
        self.send(SignalCommand::Relay { from, envelope })
    }

    fn send(&self, cmd: SignalCommand) -> Result<(), HubError> {
        self.commands
            .send(cmd)
            .map_err(|_| HubError::Closed("signaling"))
    }
}

/// Owns the peer set and the id counter. Drive it with [`SignalingHub::run`].
pub struct SignalingHub {
    peers: BTreeMap<PeerId, Outbox<SignalEnvelope>>,
    last_peer: u64,
    metrics: Arc<ServerMetrics>,
    commands: mpsc::UnboundedReceiver<SignalCommand>,
}

impl SignalingHub {
    pub fn new(metrics: Arc<ServerMetrics>) -> (Self, SignalingHubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            peers: BTreeMap::new(),
            last_peer: 0,
            metrics,
            commands: rx,
        };
        (hub, SignalingHubHandle { commands: tx })
    }

    pub async fn run(mut self) {
        info!("Signaling hub started");
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                SignalCommand::Register { outbox, respond_to } => self.register(outbox, respond_to),
                SignalCommand::Unregister { peer } => self.unregister(peer),
                SignalCommand::Relay { from, envelope } => self.relay(from, envelope),
            }
        }
        info!("Signaling hub stopped");
    }

    fn register(&mut self, outbox: Outbox<SignalEnvelope>, respond_to: oneshot::Sender<PeerId>) {
        self.last_peer += 1;
        let peer = PeerId(self.last_peer);

        // Caller gave up before we answered; nobody would ever unregister it.
        if respond_to.send(peer).is_err() {
            debug!(peer_id = %peer, "Signaling registration abandoned");
            return;
        }

        let existing: Vec<String> = self.peers.keys().map(PeerId::to_string).collect();
        let welcome = SignalEnvelope::Welcome {
            id: peer.to_string(),
            peers: existing,
        };

        // A newcomer that cannot take its welcome never joins, so nobody hears about it.
        if let Err(e) = outbox.try_deliver(welcome) {
            self.metrics.evicted();
            warn!(peer_id = %peer, "Dropping signaling peer before join: {}", e);
            return;
        }

        self.peers.insert(peer, outbox);
        self.metrics.peer_connected();
        info!(peer_id = %peer, peers = self.peers.len(), "Signaling peer joined");

        self.broadcast(
            SignalEnvelope::PeerJoined {
                id: peer.to_string(),
            },
            Some(peer),
        );
    }

    fn unregister(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_none() {
            return;
        }
        self.metrics.peer_disconnected();
        info!(peer_id = %peer, peers = self.peers.len(), "Signaling peer left");
        self.broadcast(
            SignalEnvelope::PeerLeft {
                id: peer.to_string(),
            },
            None,
        );
    }

    fn relay(&mut self, from: PeerId, mut envelope: SignalEnvelope) {
        let Some(negotiation) = envelope.negotiation_mut() else {
            debug!(peer_id = %from, "Ignoring non-relayable signaling envelope");
            return;
        };
        if negotiation.to.is_empty() {
            debug!(peer_id = %from, "Ignoring signaling envelope without target");
            return;
        }

        let target = negotiation
            .to
            .parse::<PeerId>()
            .ok()
            .filter(|t| t.to_string() == negotiation.to && self.peers.contains_key(t));
        let Some(target) = target else {
            self.metrics.relay_dropped();
            debug!(peer_id = %from, to = %negotiation.to, "Relay target is not connected");
            return;
        };

        negotiation.from = Some(from.to_string());
        self.metrics.relay_delivered();
        self.send_to(target, envelope);
    }

    fn send_to(&mut self, peer: PeerId, envelope: SignalEnvelope) {
        let Some(outbox) = self.peers.get(&peer) else {
            return;
        };
        if let Err(e) = outbox.try_deliver(envelope) {
            warn!(peer_id = %peer, "Dropping signaling peer: {}", e);
            self.evict(peer);
        }
    }

    fn broadcast(&mut self, envelope: SignalEnvelope, except: Option<PeerId>) {
        let failed: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(peer, _)| Some(**peer) != except)
            .filter_map(|(peer, outbox)| outbox.try_deliver(envelope.clone()).err().map(|e| (*peer, e)))
            .map(|(peer, e)| {
                warn!(peer_id = %peer, "Dropping signaling peer: {}", e);
                peer
            })
            .collect();

        for peer in failed {
            self.evict(peer);
        }
    }

    /// Same teardown as a disconnect: remove, close the queue, tell the rest.
    fn evict(&mut self, peer: PeerId) {
        if self.peers.remove(&peer).is_none() {
            return;
        }
        self.metrics.evicted();
        self.metrics.peer_disconnected();
        self.broadcast(
            SignalEnvelope::PeerLeft {
                id: peer.to_string(),
            },
            None,
        );
    }
}

/// Serve one upgraded `/ws/voice` socket until it closes.
pub async fn serve_signaling(socket: WebSocket, hub: SignalingHubHandle, limits: ConnectionLimits) {
    let (outbox, outbound) = outbound_queue(limits.send_queue_capacity);

    let peer = match hub.register(outbox).await {
        Ok(peer) => peer,
        Err(e) => {
            warn!("Rejecting signaling connection: {}", e);
            return;
        }
    };

    let (sink, stream) = socket.split();
    let end = pump(sink, stream, outbound, &limits, |text| {
        match serde_json::from_str::<SignalEnvelope>(text) {
            Ok(envelope) => {
                let _ = hub.relay(peer, envelope);
            }
            Err(e) => debug!(peer_id = %peer, "Ignoring malformed signaling frame: {}", e),
        }
    })
    .await;

    debug!(peer_id = %peer, reason = ?end, "Signaling connection closed");
    let _ = hub.unregister(peer);
}
