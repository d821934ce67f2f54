//! Per-connection lifecycle for streaming sessions.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;

use pulselink_core::{ClientRole, Event, InsecureId, RawEvent, SecureId};

use crate::dispatch::Dispatcher;
use crate::registry::ClientRegistry;

/// Serve one upgraded socket until it closes, then purge the session.
///
/// The session's first outbound frame announces its own address; after that
/// the read loop decodes and dispatches frames, surviving any per-message
/// failure. Socket writes happen on a dedicated task draining the session's
/// outbound queue.
pub async fn serve_streaming(
    socket: WebSocket,
    role: ClientRole,
    insecure_id: InsecureId,
    registry: Arc<ClientRegistry>,
    dispatcher: Arc<Dispatcher>,
    reject_duplicate: bool,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (secure_id, mut outbound) =
        match registry.new_streaming_session(role, insecure_id.clone(), reject_duplicate) {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(role = role.label(), error = %err, "refusing connection");
                let refusal =
                    serde_json::json!({"code": 400, "message": err.to_string()}).to_string();
                let _ = ws_tx.send(Message::Text(refusal.into())).await;
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }
        };
    tracing::info!(role = role.label(), client_id = %secure_id, "session established");

    // Sole writer for this socket.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let announce = Event::BindToServer {
        client_id: secure_id.clone(),
    };
    if let Err(err) = registry.send(&secure_id, &announce) {
        tracing::error!(client_id = %secure_id, error = %err, "failed to announce session address");
        registry.purge(&insecure_id);
        writer.abort();
        return;
    }

    read_loop(&mut ws_rx, &secure_id, &dispatcher).await;

    // Purging drops the outbound sender, which ends the writer task.
    registry.purge(&insecure_id);
    tracing::info!(role = role.label(), client_id = %secure_id, "session closed");
    let _ = writer.await;
}

async fn read_loop(
    ws_rx: &mut SplitStream<WebSocket>,
    client_id: &SecureId,
    dispatcher: &Dispatcher,
) {
    while let Some(frame) = ws_rx.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(client_id = %client_id, error = %err, "read failed");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let raw = match RawEvent::from_json(text.as_str()) {
                    Ok(raw) => raw,
                    Err(err) => {
                        tracing::warn!(client_id = %client_id, error = %err, "dropping malformed frame");
                        continue;
                    }
                };
                let event = match Event::decode(&raw) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(
                            client_id = %client_id,
                            kind = err.kind(),
                            error = %err,
                            "dropping undecodable event"
                        );
                        continue;
                    }
                };
                if let Err(err) = dispatcher.process(&event) {
                    tracing::warn!(
                        client_id = %client_id,
                        event = event.event_type(),
                        kind = err.kind(),
                        error = %err,
                        "failed to process event"
                    );
                }
            }
            Message::Close(_) => {
                tracing::debug!(client_id = %client_id, "received close frame");
                break;
            }
            // Protocol pings are answered by the framework.
            Message::Ping(_) | Message::Pong(_) => {}
            other => {
                tracing::warn!(client_id = %client_id, frame = ?other, "unsupported frame type");
            }
        }
    }
}
