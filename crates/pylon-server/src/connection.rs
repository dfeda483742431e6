//! Transport-side connection state and the channel-backed message writer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pylon_core::message::OperationMessage;
use pylon_protocol::writer::{MessageWriter, WriteError};

/// Liveness bookkeeping for one connected WebSocket client.
pub struct ClientConnection {
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has responded since the last ping.
    is_alive: AtomicBool,
    /// When the last Pong (or any activity) was received.
    last_pong: Mutex<Instant>,
}

impl ClientConnection {
    /// Create liveness state for a freshly accepted socket.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
        }
    }

    /// Mark the connection as alive (pong or inbound activity).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Check and reset the alive flag for the heartbeat cycle.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl Default for ClientConnection {
    fn default() -> Self {
        Self::new()
    }
}

/// [`MessageWriter`] over the connection's bounded outbound channel.
///
/// `send().await` applies backpressure instead of dropping: a slow socket
/// slows its subscription pumps down rather than losing messages, and the
/// channel preserves the order writes were issued in. A closed channel means
/// the forwarder task is gone, surfaced as a [`WriteError`].
pub struct ChannelWriter {
    tx: mpsc::Sender<String>,
}

impl ChannelWriter {
    /// Wrap the outbound channel's sender.
    pub fn new(tx: mpsc::Sender<String>) -> Arc<Self> {
        Arc::new(Self { tx })
    }
}

#[async_trait]
impl MessageWriter for ChannelWriter {
    async fn write(&self, message: OperationMessage) -> Result<(), WriteError> {
        let json = serde_json::to_string(&message)
            .map_err(|e| WriteError::new(format!("serialize failed: {e}")))?;
        self.tx
            .send(json)
            .await
            .map_err(|_| WriteError::new("outbound channel closed"))
    }
}
