//! # pylon-server
//!
//! Axum HTTP + `WebSocket` transport for the subscription protocol.
//!
//! - `WebSocket` endpoint: `graphql-ws` subprotocol, per-connection session
//!   loop, heartbeat, connection limit
//! - Outbound delivery over a bounded channel with backpressure
//! - HTTP endpoints: health check
//! - Graceful shutdown via `tokio::signal`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod health;
pub mod logging;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use connection::{ChannelWriter, ClientConnection};
pub use server::{AppState, SubscriptionServer};
pub use session::run_ws_session;
