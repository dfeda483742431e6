//! Outbound message delivery boundary.

use async_trait::async_trait;

use pylon_core::message::OperationMessage;

/// A message could not be delivered on the connection's transport.
///
/// Not retried at this layer: a failed write means the transport is broken
/// and the connection's subscriptions are torn down.
#[derive(Debug, thiserror::Error)]
#[error("transport write failed: {reason}")]
pub struct WriteError {
    /// What went wrong.
    pub reason: String,
}

impl WriteError {
    /// Build an error from a reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Serializes and sends outbound protocol messages for one connection.
///
/// Implementations must preserve the order of writes issued from a single
/// task; the protocol relies on this for per-operation message ordering.
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Deliver one message on the connection's transport.
    async fn write(&self, message: OperationMessage) -> Result<(), WriteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_display() {
        let err = WriteError::new("channel closed");
        assert_eq!(err.to_string(), "transport write failed: channel closed");
    }
}
