//! WebSocket session lifecycle — one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use pylon_core::message::OperationMessage;
use pylon_protocol::handler::ProtocolHandler;

use crate::config::ServerConfig;
use crate::connection::{ChannelWriter, ClientConnection};

/// Run a WebSocket session for a connected client.
///
/// 1. Opens the connection with the protocol handler
/// 2. Spawns the outbound forwarder (channel → socket, plus Ping cadence)
/// 3. Dispatches inbound frames as protocol messages, in arrival order
/// 4. Disconnects unresponsive clients after the pong timeout
/// 5. Tears the connection down on exit, whatever the reason
#[instrument(skip_all)]
pub async fn run_ws_session(
    ws: WebSocket,
    handler: Arc<ProtocolHandler>,
    config: Arc<ServerConfig>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (send_tx, mut send_rx) = mpsc::channel::<String>(config.send_queue_size);
    let writer = ChannelWriter::new(send_tx);
    let mut ctx = handler.open_connection(writer);
    let liveness = Arc::new(ClientConnection::new());

    info!(connection_id = %ctx.connection_id(), "client connected");
    counter!("ws_connections_total").increment(1);

    // Outbound forwarder with periodic Ping frames.
    let ping_interval = Duration::from_secs(config.ping_interval_secs);
    let pong_timeout = Duration::from_secs(config.pong_timeout_secs);
    let outbound_liveness = Arc::clone(&liveness);
    let mut outbound = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // Skip the immediate first tick
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                msg = send_rx.recv() => {
                    match msg {
                        Some(text) => {
                            // A client that stops reading stalls the socket
                            // write; bound it by the pong timeout instead of
                            // waiting forever (a stalled write would also
                            // starve the ping arm below).
                            let send = ws_tx.send(Message::Text(text.into()));
                            match tokio::time::timeout(pong_timeout, send).await {
                                Ok(Ok(())) => {}
                                Ok(Err(_)) => break,
                                Err(_) => {
                                    warn!(
                                        "outbound write stalled for {pong_timeout:?}, disconnecting"
                                    );
                                    break;
                                }
                            }
                        }
                        None => break,
                    }
                }
                _ = ping.tick() => {
                    if !outbound_liveness.check_alive()
                        && outbound_liveness.last_pong_elapsed() > pong_timeout
                    {
                        warn!("client unresponsive for {pong_timeout:?}, disconnecting");
                        break;
                    }
                    let send = ws_tx.send(Message::Ping(vec![].into()));
                    match tokio::time::timeout(pong_timeout, send).await {
                        Ok(Ok(())) => {}
                        Ok(Err(_)) => break,
                        Err(_) => {
                            warn!("ping write stalled for {pong_timeout:?}, disconnecting");
                            break;
                        }
                    }
                }
            }
        }
        // Dropping send_rx closes the channel: pending and future writes
        // fail immediately instead of parking on a dead socket.
    });

    // Inbound frames dispatch sequentially; per-connection ordering is the
    // arrival order. Forwarder exit (socket gone or client unresponsive)
    // ends the session even when the client never sends another frame.
    loop {
        let frame = tokio::select! {
            _ = &mut outbound => {
                debug!("outbound forwarder ended, closing session");
                break;
            }
            frame = ws_rx.next() => frame,
        };
        let Some(Ok(msg)) = frame else { break };
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    debug!(len = data.len(), "non-UTF8 binary frame, dropping");
                    None
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                liveness.mark_alive();
                None
            }
        };
        let Some(text) = text else { continue };
        liveness.mark_alive();

        let message = match serde_json::from_str::<OperationMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable frame, dropping");
                counter!("ws_frames_rejected_total").increment(1);
                continue;
            }
        };

        handler.handle_message(&mut ctx, message).await;
        if ctx.is_closed() {
            // connection_terminate or a failed write; nothing more to read.
            break;
        }
    }

    info!(connection_id = %ctx.connection_id(), "client disconnected");
    counter!("ws_disconnections_total").increment(1);
    histogram!("ws_connection_duration_seconds").record(liveness.age().as_secs_f64());
    handler.handle_disconnect(&mut ctx).await;
    outbound.abort();
}
