//! One active subscription: exclusive owner of its result stream, pumping
//! items to the connection's message writer until closed.

use std::sync::Arc;

use futures::StreamExt;
use metrics::counter;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pylon_core::message::{ErrorPayload, OperationMessage};
use pylon_core::{ConnectionId, OperationId};

use crate::gateway::ResultStream;
use crate::registry::SubscriptionRegistry;
use crate::writer::MessageWriter;

/// Lifecycle state of a subscription handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandleState {
    /// The pump task is consuming the stream.
    Running,
    /// Closed: no further message for this operation may be delivered.
    Closed,
}

/// Server-side owner of one active subscription's stream and delivery path.
///
/// `stop`, `connection_terminate`, and transport disconnect all cancel a
/// subscription through the same [`close`](Self::close) path.
pub struct SubscriptionHandle {
    operation_id: OperationId,
    writer: Arc<dyn MessageWriter>,
    /// Delivery gate. Every outbound write happens while this lock is held,
    /// and `close` flips the state under the same lock — so the "already
    /// closed?" check is atomic with the close flag, and no message can be
    /// delivered once `close` has returned.
    state: Mutex<HandleState>,
    cancel: CancellationToken,
}

impl SubscriptionHandle {
    /// Create a handle for one operation. Call [`spawn`](Self::spawn) to
    /// start consuming the stream.
    pub fn new(operation_id: OperationId, writer: Arc<dyn MessageWriter>) -> Self {
        Self {
            operation_id,
            writer,
            state: Mutex::new(HandleState::Running),
            cancel: CancellationToken::new(),
        }
    }

    /// The operation this handle serves.
    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> HandleState {
        *self.state.lock().await
    }

    /// Start the pump task. The task exclusively owns `stream`; when it
    /// exits — natural completion, stream fault, or cancellation — it drops
    /// the stream (the unsubscribe) and releases its registry entry so the
    /// operation id becomes reusable.
    pub fn spawn(
        self: &Arc<Self>,
        stream: ResultStream,
        registry: Arc<SubscriptionRegistry>,
        connection_id: ConnectionId,
    ) -> JoinHandle<()> {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            handle.pump(stream).await;
            // No-op when `stop` or teardown already removed the entry.
            let _ = registry.remove(&connection_id, &handle.operation_id);
        })
    }

    /// Consume the stream, delivering each item as a `data` message, then
    /// `complete` on natural end or `error` on a stream fault.
    async fn pump(&self, mut stream: ResultStream) {
        loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(result)) => {
                    let payload = match serde_json::to_value(&result) {
                        Ok(value) => value,
                        Err(e) => {
                            warn!(
                                operation_id = %self.operation_id,
                                error = %e,
                                "failed to serialize stream item, skipping"
                            );
                            continue;
                        }
                    };
                    if !self
                        .deliver(OperationMessage::data(self.operation_id.clone(), payload))
                        .await
                    {
                        break;
                    }
                }
                Some(Err(fault)) => {
                    // One error message, then the subscription is done; the
                    // connection itself survives.
                    counter!("subscription_stream_faults_total").increment(1);
                    let payload = ErrorPayload::from(fault).to_value();
                    let _ = self
                        .deliver(OperationMessage::error(self.operation_id.clone(), payload))
                        .await;
                    break;
                }
                None => {
                    counter!("subscriptions_completed_total").increment(1);
                    let _ = self
                        .deliver(OperationMessage::complete(self.operation_id.clone()))
                        .await;
                    break;
                }
            }
        }

        let mut state = self.state.lock().await;
        *state = HandleState::Closed;
        debug!(operation_id = %self.operation_id, "subscription pump finished");
        // `stream` is dropped here, releasing the upstream subscription.
    }

    /// Deliver one message unless the handle is closed. Returns `false`
    /// when the handle is closed or the transport write failed.
    async fn deliver(&self, message: OperationMessage) -> bool {
        let state = self.state.lock().await;
        if *state == HandleState::Closed {
            return false;
        }
        match self.writer.write(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    operation_id = %self.operation_id,
                    error = %e,
                    "transport write failed, stopping pump"
                );
                self.cancel.cancel();
                false
            }
        }
    }

    /// Close the handle. Idempotent. Cancels the pump promptly; once this
    /// returns, no message for this operation id will be delivered — an
    /// item already in flight finishes first (the close waits on the
    /// delivery gate), anything after is discarded.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if *state == HandleState::Closed {
            return;
        }
        *state = HandleState::Closed;
        self.cancel.cancel();
        debug!(operation_id = %self.operation_id, "subscription closed");
    }
}
