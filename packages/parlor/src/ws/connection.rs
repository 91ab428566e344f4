//! Connection pump
//!
//! Bridges one socket to a hub with two loops:
//! - a writer task that drains the bounded outbound queue and sends keepalive pings
//! - a reader loop that hands text frames to the caller and enforces the pong deadline
//!
//! Whichever loop finishes first cancels the other. The hub closes a connection by
//! dropping its [`Outbox`], which makes the writer send a close frame and exit.

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::ConnectionLimits;

/// Process-unique handle for a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection writer has gone away")]
    Closed,
}

/// Hub-side end of a connection's outbound queue. Dropping it closes the queue.
#[derive(Debug)]
pub struct Outbox<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Outbox<T> {
    /// Enqueue without waiting. A slow reader is never allowed to stall the hub.
    pub fn try_deliver(&self, msg: T) -> Result<(), DeliveryError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Create a bounded outbound queue: the [`Outbox`] goes to the hub, the receiver to [`pump`].
pub fn outbound_queue<T>(capacity: usize) -> (Outbox<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbox { tx }, rx)
}

/// Why the reader loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEnd {
    /// Peer sent a close frame or the stream ended
    Closed,
    /// No pong within the liveness window
    Timeout,
    /// A frame exceeded the read limit
    TooLarge(usize),
    /// The writer stopped (queue closed by the hub, or a write failed)
    WriterStopped,
    /// Transport-level receive error
    Error(String),
}

/// Run both loops for one socket until either side gives up.
///
/// `on_text` is called for every text frame (and every binary frame that is valid
/// UTF-8) in arrival order. Parsing and hub submission are the caller's business.
pub async fn pump<T, Tx, Rx, E, F>(
    sink: Tx,
    stream: Rx,
    outbound: mpsc::Receiver<T>,
    limits: &ConnectionLimits,
    on_text: F,
) -> ReadEnd
where
    T: Serialize + Send + 'static,
    Tx: Sink<Message> + Unpin + Send + 'static,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
    F: FnMut(&str),
{
    let shutdown = CancellationToken::new();

    tokio::spawn(write_loop(
        sink,
        outbound,
        limits.ping_period(),
        limits.write_wait,
        shutdown.clone(),
    ));

    let end = read_loop(
        stream,
        limits.max_message_bytes,
        limits.pong_wait,
        &shutdown,
        on_text,
    )
    .await;

    // The writer owns the sink; it finishes its current write (bounded by
    // write_wait) and drops it, which closes the socket.
    shutdown.cancel();
    end
}

async fn read_loop<Rx, E, F>(
    mut stream: Rx,
    max_message_bytes: usize,
    pong_wait: Duration,
    shutdown: &CancellationToken,
    mut on_text: F,
) -> ReadEnd
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
    F: FnMut(&str),
{
    let mut deadline = Instant::now() + pong_wait;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return ReadEnd::WriterStopped,
            _ = sleep_until(deadline) => return ReadEnd::Timeout,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > max_message_bytes {
                        return ReadEnd::TooLarge(text.len());
                    }
                    on_text(text.as_str());
                }
                Some(Ok(Message::Binary(data))) => {
                    if data.len() > max_message_bytes {
                        return ReadEnd::TooLarge(data.len());
                    }
                    match std::str::from_utf8(&data) {
                        Ok(text) => on_text(text),
                        Err(_) => debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    deadline = Instant::now() + pong_wait;
                }
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => return ReadEnd::Closed,
                Some(Err(e)) => return ReadEnd::Error(e.to_string()),
            }
        }
    }
}

async fn write_loop<T, Tx>(
    mut sink: Tx,
    mut outbound: mpsc::Receiver<T>,
    ping_period: Duration,
    write_wait: Duration,
    shutdown: CancellationToken,
) where
    T: Serialize,
    Tx: Sink<Message> + Unpin,
{
    // Leaving this function for any reason unblocks the reader.
    let _stop_reader = shutdown.clone().drop_guard();
    let mut ping = tokio::time::interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            next = outbound.recv() => {
                let Some(msg) = next else {
                    // Queue closed by the hub
                    let _ = send_with_deadline(&mut sink, Message::Close(None), write_wait).await;
                    return;
                };
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        error!("Failed to serialize outbound envelope: {}", e);
                        continue;
                    }
                };
                if !send_with_deadline(&mut sink, Message::Text(json.into()), write_wait).await {
                    debug!("Write failed or timed out, closing connection");
                    return;
                }
            }
            _ = ping.tick() => {
                if !send_with_deadline(&mut sink, Message::Ping(Bytes::new()), write_wait).await {
                    debug!("Ping failed or timed out, closing connection");
                    return;
                }
            }
        }
    }
}

async fn send_with_deadline<Tx>(sink: &mut Tx, msg: Message, write_wait: Duration) -> bool
where
    Tx: Sink<Message> + Unpin,
{
    matches!(timeout(write_wait, sink.send(msg)).await, Ok(Ok(())))
}
