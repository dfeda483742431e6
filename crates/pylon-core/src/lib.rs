//! # pylon-core
//!
//! Foundation types for the Pylon query-subscription transport:
//!
//! - Wire-format operation messages (`connection_init` through
//!   `connection_terminate`) exchanged over a bidirectional transport
//! - Branded ID newtypes for connections and operations
//! - The protocol error taxonomy

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod message;

pub use errors::ProtocolError;
pub use ids::{ConnectionId, OperationId};
pub use message::{ErrorLocation, ErrorPayload, MessageType, OperationMessage, QueryPayload};
