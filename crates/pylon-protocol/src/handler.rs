//! Inbound message classification and operation lifecycle.
//!
//! [`ProtocolHandler`] is the connection-facing surface of this crate: the
//! transport parses frames into [`OperationMessage`]s and feeds them here,
//! one connection at a time. The handler is shared across connections;
//! per-connection state lives in the [`ConnectionContext`] owned by each
//! session task.

use std::sync::Arc;

use metrics::{counter, gauge};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use pylon_core::message::{ErrorPayload, MessageType, OperationMessage, QueryPayload};
use pylon_core::{ConnectionId, OperationId, ProtocolError};

use crate::gateway::{ExecutionGateway, ExecutionOutcome, ExecutionRequest, SubscriptionOutcome};
use crate::handle::SubscriptionHandle;
use crate::registry::{RegisterError, SubscriptionRegistry};
use crate::writer::MessageWriter;

/// Builds the opaque per-request user context from connection state.
pub type UserContextFactory = Arc<dyn Fn(&ConnectionContext) -> Option<Value> + Send + Sync>;

/// Server-wide knobs applied to every operation request.
#[derive(Clone, Default)]
pub struct ConnectionOptions {
    /// Names of validation rules the gateway should apply.
    pub validation_rules: Vec<String>,
    /// Whether execution exceptions may be exposed to clients.
    pub expose_exceptions: bool,
    /// Factory for the per-request user context, if any.
    pub user_context_factory: Option<UserContextFactory>,
}

/// Mutable per-connection state, owned by the connection's session task.
pub struct ConnectionContext {
    connection_id: ConnectionId,
    writer: Arc<dyn MessageWriter>,
    /// Payload of the client's `connection_init`, once received.
    init_payload: Option<Value>,
    /// Set once teardown has run, so it runs at most once per connection.
    closed: bool,
}

impl ConnectionContext {
    /// This connection's server-assigned id.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// The `connection_init` payload, if the client has sent one.
    pub fn init_payload(&self) -> Option<&Value> {
        self.init_payload.as_ref()
    }

    /// Whether teardown has already run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// The protocol state machine: classifies each inbound message and drives
/// the registry, the gateway, and subscription handles accordingly.
pub struct ProtocolHandler {
    gateway: Arc<dyn ExecutionGateway>,
    registry: Arc<SubscriptionRegistry>,
    options: ConnectionOptions,
}

impl ProtocolHandler {
    /// Build a handler over a gateway and a registry.
    pub fn new(
        gateway: Arc<dyn ExecutionGateway>,
        registry: Arc<SubscriptionRegistry>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            gateway,
            registry,
            options,
        }
    }

    /// The shared subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Admit a new transport connection: assign it an id, open its registry
    /// table, and return the context the session task will own.
    ///
    /// Opening happens at transport connect, not at `connection_init`, so a
    /// `start` arriving before the init handshake still finds its table.
    pub fn open_connection(&self, writer: Arc<dyn MessageWriter>) -> ConnectionContext {
        let connection_id = ConnectionId::new();
        self.registry.open_connection(connection_id.clone());
        counter!("connections_opened_total").increment(1);
        gauge!("connections_active").increment(1.0);
        debug!(connection_id = %connection_id, "connection opened");
        ConnectionContext {
            connection_id,
            writer,
            init_payload: None,
            closed: false,
        }
    }

    /// Process one inbound message. Never fails the caller: protocol
    /// violations are answered or logged, and transport write failures tear
    /// the connection down internally.
    #[instrument(skip_all, fields(connection_id = %ctx.connection_id, message_type = %message.message_type))]
    pub async fn handle_message(&self, ctx: &mut ConnectionContext, message: OperationMessage) {
        if ctx.closed {
            debug!("message after teardown, dropping");
            return;
        }
        if let Err(e) = message.validate() {
            warn!(error = %e, "malformed message, dropping");
            counter!("messages_rejected_total").increment(1);
            return;
        }
        counter!("messages_received_total", "type" => message.message_type.as_str()).increment(1);

        match message.message_type {
            MessageType::ConnectionInit => self.handle_init(ctx, message.payload).await,
            MessageType::Start => {
                // validate() guarantees the id is present.
                let Some(id) = message.id else { return };
                self.handle_start(ctx, id, message.payload).await;
            }
            MessageType::Stop => {
                let Some(id) = message.id else { return };
                self.handle_stop(ctx, &id).await;
            }
            MessageType::ConnectionTerminate => {
                debug!("client requested termination");
                self.teardown(ctx).await;
            }
            MessageType::ConnectionAck
            | MessageType::Data
            | MessageType::Error
            | MessageType::Complete => {
                let err = ProtocolError::UnexpectedType {
                    message_type: message.message_type,
                };
                warn!(error = %err, "server-originated message type received from client");
                if let Some(id) = message.id {
                    let payload = ErrorPayload::new(err.to_string());
                    let _ = self
                        .send(ctx, OperationMessage::error(id, payload.to_value()))
                        .await;
                }
            }
        }
    }

    /// The transport went away. Closes every subscription on the connection.
    #[instrument(skip_all, fields(connection_id = %ctx.connection_id))]
    pub async fn handle_disconnect(&self, ctx: &mut ConnectionContext) {
        debug!("transport disconnected");
        self.teardown(ctx).await;
    }

    async fn handle_init(&self, ctx: &mut ConnectionContext, payload: Option<Value>) {
        ctx.init_payload = payload;
        let _ = self.send(ctx, OperationMessage::ack()).await;
    }

    async fn handle_start(
        &self,
        ctx: &mut ConnectionContext,
        id: OperationId,
        payload: Option<Value>,
    ) {
        if self.registry.get(&ctx.connection_id, &id).is_some() {
            warn!(operation_id = %id, "duplicate operation id");
            let payload = ErrorPayload::new(format!("operation '{id}' is already running"));
            let _ = self
                .send(ctx, OperationMessage::error(id, payload.to_value()))
                .await;
            return;
        }

        let payload = match QueryPayload::from_value(payload.unwrap_or(Value::Null)) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(operation_id = %id, error = %e, "invalid start payload");
                let payload = ErrorPayload::new(e.to_string());
                let _ = self
                    .send(ctx, OperationMessage::error(id, payload.to_value()))
                    .await;
                return;
            }
        };

        let request = self.build_request(ctx, payload);
        match self.gateway.execute(request).await {
            ExecutionOutcome::Single(result) => {
                let payload = serde_json::to_value(&result).unwrap_or(Value::Null);
                if self
                    .send(ctx, OperationMessage::data(id.clone(), payload))
                    .await
                {
                    let _ = self.send(ctx, OperationMessage::complete(id)).await;
                }
            }
            ExecutionOutcome::Subscription(outcome) => {
                self.register_subscription(ctx, id, outcome).await;
            }
        }
    }

    async fn register_subscription(
        &self,
        ctx: &mut ConnectionContext,
        id: OperationId,
        outcome: SubscriptionOutcome,
    ) {
        if let Some(first) = outcome.errors.into_iter().next() {
            // Setup failed; the first error speaks for the operation, and
            // the streams (if any) are dropped unconsumed.
            let payload = ErrorPayload::from(first);
            let _ = self
                .send(ctx, OperationMessage::error(id, payload.to_value()))
                .await;
            return;
        }

        let mut streams = outcome.streams;
        if streams.len() != 1 {
            warn!(
                operation_id = %id,
                streams = streams.len(),
                "subscription did not resolve to a single stream"
            );
            let payload = ErrorPayload::new("subscription must resolve to a single stream");
            let _ = self
                .send(ctx, OperationMessage::error(id, payload.to_value()))
                .await;
            return;
        }
        let Some(stream) = streams.drain().next().map(|(_, stream)| stream) else {
            return;
        };

        let handle = Arc::new(SubscriptionHandle::new(id.clone(), Arc::clone(&ctx.writer)));
        match self.registry.add(&ctx.connection_id, Arc::clone(&handle)) {
            Ok(()) => {
                counter!("subscriptions_started_total").increment(1);
                debug!(operation_id = %id, "subscription started");
                let _ = handle.spawn(
                    stream,
                    Arc::clone(&self.registry),
                    ctx.connection_id.clone(),
                );
            }
            Err(RegisterError::Duplicate(id)) => {
                let payload = ErrorPayload::new(format!("operation '{id}' is already running"));
                let _ = self
                    .send(ctx, OperationMessage::error(id, payload.to_value()))
                    .await;
            }
            Err(RegisterError::ConnectionClosed(_)) => {
                // Teardown raced the start; the stream is dropped unconsumed.
                debug!(operation_id = %id, "start after teardown, dropping");
            }
        }
    }

    async fn handle_stop(&self, ctx: &ConnectionContext, id: &OperationId) {
        match self.registry.remove(&ctx.connection_id, id) {
            Some(handle) => {
                handle.close().await;
                counter!("subscriptions_stopped_total").increment(1);
                debug!(operation_id = %id, "subscription stopped");
            }
            None => {
                // Benign: the stream may have completed moments earlier.
                debug!(operation_id = %id, "stop for unknown operation");
            }
        }
    }

    /// Close every subscription and drop the connection's registry table.
    /// Runs at most once per connection.
    async fn teardown(&self, ctx: &mut ConnectionContext) {
        if ctx.closed {
            return;
        }
        ctx.closed = true;
        let handles = self.registry.remove_connection(&ctx.connection_id);
        let count = handles.len();
        for handle in handles {
            handle.close().await;
        }
        gauge!("connections_active").decrement(1.0);
        debug!(subscriptions = count, "connection torn down");
    }

    fn build_request(&self, ctx: &ConnectionContext, payload: QueryPayload) -> ExecutionRequest {
        let user_context = self
            .options
            .user_context_factory
            .as_ref()
            .and_then(|factory| factory(ctx));
        ExecutionRequest {
            query: payload.query,
            operation_name: payload.operation_name,
            variables: payload.variables,
            validation_rules: self.options.validation_rules.clone(),
            expose_exceptions: self.options.expose_exceptions,
            user_context,
        }
    }

    /// Write one message, tearing the connection down on failure. Returns
    /// whether the write succeeded.
    async fn send(&self, ctx: &mut ConnectionContext, message: OperationMessage) -> bool {
        match ctx.writer.write(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "outbound write failed, tearing down connection");
                self.teardown(ctx).await;
                false
            }
        }
    }
}
