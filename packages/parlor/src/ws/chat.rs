//! Chat fan-out hub
//!
//! One control task owns the registry of `/ws` connections. Every valid chat
//! message is persisted (best effort) and then broadcast to all connections,
//! the sender included. Presence is recomputed only when membership changes.

use axum::extract::ws::WebSocket;
use futures::StreamExt;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::HubError;
use super::connection::{ConnId, Outbox, outbound_queue, pump};
use crate::config::{ConnectionLimits, default_channel};
use crate::metrics::ServerMetrics;
use crate::store::MessageStore;

/// A chat frame as sent by a client. Missing or null fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChatInbound {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub author: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub channel: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatInbound {
    /// Trim every field and default the channel. `None` if author or text ends up empty.
    fn normalize(self) -> Option<Self> {
        let author = self.author.trim();
        let text = self.text.trim();
        if author.is_empty() || text.is_empty() {
            return None;
        }
        let channel = match self.channel.trim() {
            "" => default_channel(),
            c => c.to_string(),
        };
        Some(Self {
            author: author.to_string(),
            channel,
            text: text.to_string(),
        })
    }
}

/// Envelopes pushed to chat connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEnvelope {
    Chat {
        author: String,
        channel: String,
        text: String,
    },
    Presence {
        users: Vec<String>,
    },
}

#[derive(Debug)]
enum ChatCommand {
    Register {
        conn: ConnId,
        outbox: Outbox<ChatEnvelope>,
    },
    Unregister {
        conn: ConnId,
    },
    Submit {
        conn: ConnId,
        message: ChatInbound,
    },
}

struct Member {
    outbox: Outbox<ChatEnvelope>,
    /// Learned from the first valid message this connection sends
    name: Option<String>,
}

/// Cloneable front door to the chat hub's control task.
#[derive(Debug, Clone)]
pub struct ChatHubHandle {
    commands: mpsc::UnboundedSender<ChatCommand>,
}

impl ChatHubHandle {
    pub fn register(&self, conn: ConnId, outbox: Outbox<ChatEnvelope>) -> Result<(), HubError> {
        self.send(ChatCommand::Register { conn, outbox })
    }

    pub fn unregister(&self, conn: ConnId) -> Result<(), HubError> {
        self.send(ChatCommand::Unregister { conn })
    }

    pub fn submit(&self, conn: ConnId, message: ChatInbound) -> Result<(), HubError> {
        self.send(ChatCommand::Submit { conn, message })
    }

    fn send(&self, cmd: ChatCommand) -> Result<(), HubError> {
        self.commands
            .send(cmd)
            .map_err(|_| HubError::Closed("chat"))
    }
}

/// Owns the chat registry. Drive it with [`ChatHub::run`].
pub struct ChatHub {
    members: BTreeMap<ConnId, Member>,
    store: MessageStore,
    metrics: Arc<ServerMetrics>,
    commands: mpsc::UnboundedReceiver<ChatCommand>,
}

impl ChatHub {
    pub fn new(store: MessageStore, metrics: Arc<ServerMetrics>) -> (Self, ChatHubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            members: BTreeMap::new(),
            store,
            metrics,
            commands: rx,
        };
        (hub, ChatHubHandle { commands: tx })
    }

    /// Process commands until every handle has been dropped.
    pub async fn run(mut self) {
        info!("Chat hub started");
        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                ChatCommand::Register { conn, outbox } => self.register(conn, outbox),
                ChatCommand::Unregister { conn } => self.unregister(conn),
                ChatCommand::Submit { conn, message } => self.submit(conn, message).await,
            }
        }
        info!("Chat hub stopped");
    }

    fn register(&mut self, conn: ConnId, outbox: Outbox<ChatEnvelope>) {
        self.members.insert(conn, Member { outbox, name: None });
        self.metrics.chat_connected();
        info!(conn_id = %conn, members = self.members.len(), "Chat connection registered");
        self.broadcast(self.presence());
    }

    fn unregister(&mut self, conn: ConnId) {
        // Dropping the member's outbox closes its queue
        if self.members.remove(&conn).is_none() {
            return;
        }
        self.metrics.chat_disconnected();
        info!(conn_id = %conn, members = self.members.len(), "Chat connection unregistered");
        self.broadcast(self.presence());
    }

    async fn submit(&mut self, conn: ConnId, message: ChatInbound) {
        let Some(message) = message.normalize() else {
            self.metrics.chat_rejected();
            debug!(conn_id = %conn, "Discarding chat message with empty author or text");
            return;
        };

        // Presence picks the name up on the next membership change
        if let Some(member) = self.members.get_mut(&conn) {
            member.name = Some(message.author.clone());
        }

        if let Err(e) = self
            .store
            .append(&message.author, &message.channel, &message.text)
            .await
        {
            self.metrics.persist_failed();
            warn!(conn_id = %conn, "Failed to persist chat message: {:#}", e);
        }

        self.metrics.chat_message();
        self.broadcast(ChatEnvelope::Chat {
            author: message.author,
            channel: message.channel,
            text: message.text,
        });
    }

    /// Distinct non-empty names in registry order.
    fn presence(&self) -> ChatEnvelope {
        let mut users: Vec<String> = Vec::new();
        for name in self.members.values().filter_map(|m| m.name.as_deref()) {
            if !name.is_empty() && !users.iter().any(|u| u == name) {
                users.push(name.to_string());
            }
        }
        ChatEnvelope::Presence { users }
    }

    /// Deliver to every member. Members that cannot take it are dropped, and the
    /// survivors get a fresh presence list, until a round completes with no drops.
    fn broadcast(&mut self, envelope: ChatEnvelope) {
        let mut next = Some(envelope);
        while let Some(envelope) = next.take() {
            if self.fan_out(&envelope) > 0 {
                next = Some(self.presence());
            }
        }
    }

    fn fan_out(&mut self, envelope: &ChatEnvelope) -> usize {
        let failed: Vec<ConnId> = self
            .members
            .iter()
            .filter_map(|(conn, m)| m.outbox.try_deliver(envelope.clone()).err().map(|e| (*conn, e)))
            .map(|(conn, e)| {
                warn!(conn_id = %conn, "Dropping chat connection: {}", e);
                conn
            })
            .collect();

        for conn in &failed {
            self.members.remove(conn);
            self.metrics.evicted();
            self.metrics.chat_disconnected();
        }
        failed.len()
    }
}

/// Serve one upgraded `/ws` socket until it closes.
pub async fn serve_chat(socket: WebSocket, hub: ChatHubHandle, limits: ConnectionLimits) {
    let conn = ConnId::next();
    let (outbox, outbound) = outbound_queue(limits.send_queue_capacity);

    if let Err(e) = hub.register(conn, outbox) {
        warn!(conn_id = %conn, "Rejecting chat connection: {}", e);
        return;
    }

    let (sink, stream) = socket.split();
    let end = pump(sink, stream, outbound, &limits, |text| {
        match serde_json::from_str::<ChatInbound>(text) {
            Ok(message) => {
                let _ = hub.submit(conn, message);
            }
            Err(e) => debug!(conn_id = %conn, "Ignoring malformed chat frame: {}", e),
        }
    })
    .await;

    debug!(conn_id = %conn, reason = ?end, "Chat connection closed");
    let _ = hub.unregister(conn);
}
