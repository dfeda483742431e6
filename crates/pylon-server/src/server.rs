//! `SubscriptionServer` — Axum HTTP + WebSocket server.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pylon_protocol::gateway::ExecutionGateway;
use pylon_protocol::handler::{ConnectionOptions, ProtocolHandler};
use pylon_protocol::registry::SubscriptionRegistry;

use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The shared protocol state machine.
    pub handler: Arc<ProtocolHandler>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// When the server started.
    pub start_time: Instant,
}

/// The subscription server: WebSocket transport over a protocol handler.
pub struct SubscriptionServer {
    config: Arc<ServerConfig>,
    handler: Arc<ProtocolHandler>,
    start_time: Instant,
}

impl SubscriptionServer {
    /// Create a server over an execution gateway.
    pub fn new(
        config: ServerConfig,
        gateway: Arc<dyn ExecutionGateway>,
        options: ConnectionOptions,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        Self {
            config: Arc::new(config),
            handler: Arc::new(ProtocolHandler::new(gateway, registry, options)),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            handler: Arc::clone(&self.handler),
            config: Arc::clone(&self.config),
            start_time: self.start_time,
        };

        Router::new()
            .route("/graphql", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the protocol handler.
    pub fn handler(&self) -> &Arc<ProtocolHandler> {
        &self.handler
    }

    /// Bind and serve until ctrl-c.
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr()).await?;
        info!(addr = %listener.local_addr()?, "listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await?;
        Ok(())
    }
}

/// GET /graphql — WebSocket upgrade for the subscription protocol.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.handler.registry().connection_count() >= state.config.max_connections {
        warn!(
            max = state.config.max_connections,
            "connection limit reached, refusing upgrade"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.protocols(["graphql-ws"])
        .max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_ws_session(socket, state.handler, state.config))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.handler.registry();
    Json(health::health_check(
        state.start_time,
        registry.connection_count(),
        registry.subscription_count(),
    ))
}
