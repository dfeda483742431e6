//! # pylon-protocol
//!
//! The per-connection query-subscription protocol: a state machine that
//! multiplexes many independent operations over one bidirectional message
//! transport.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `gateway` | Execution engine boundary: run an operation, get a result or a stream |
//! | `writer` | Transport boundary: serialize and deliver one outbound message |
//! | `registry` | Concurrent directory of active handles, keyed by connection and operation |
//! | `handle` | One active subscription: owns its stream, pumps items to the writer |
//! | `handler` | Inbound message classification and lifecycle coordination |
//!
//! ## Data Flow
//!
//! inbound message → `handler` classifies by type → mutates `registry` →
//! `start` delegates to the `gateway` → a stream result is wrapped in a
//! `handle` whose pump task delivers `data` messages until closed.

#![deny(unsafe_code)]

pub mod gateway;
pub mod handle;
pub mod handler;
pub mod registry;
pub mod writer;

pub use gateway::{
    ExecutionError, ExecutionGateway, ExecutionOutcome, ExecutionRequest, ExecutionResult,
    ResultStream, SubscriptionOutcome,
};
pub use handle::{HandleState, SubscriptionHandle};
pub use handler::{ConnectionContext, ConnectionOptions, ProtocolHandler, UserContextFactory};
pub use registry::{RegisterError, SubscriptionRegistry};
pub use writer::{MessageWriter, WriteError};
