//! Protocol error taxonomy.
//!
//! Protocol errors are operation-scoped and never fatal to a connection:
//! the handler answers with an `error` message when the operation id is
//! known and drops-and-logs otherwise.

use crate::message::MessageType;

/// A malformed or out-of-place inbound message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// An operation-scoped message arrived without an operation id.
    #[error("'{message_type}' message requires an operation id")]
    MissingOperationId {
        /// The offending message type.
        message_type: MessageType,
    },

    /// The payload did not match the shape required by the message type.
    #[error("invalid '{message_type}' payload: {reason}")]
    InvalidPayload {
        /// The offending message type.
        message_type: MessageType,
        /// Parser diagnostic.
        reason: String,
    },

    /// A server-originated message type arrived from the client.
    #[error("unexpected '{message_type}' message from client")]
    UnexpectedType {
        /// The offending message type.
        message_type: MessageType,
    },
}
