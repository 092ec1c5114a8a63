//! WebSocket connection lifecycle: identity resolution → handshake →
//! message loop → cleanup.

use std::{sync::Arc, time::Duration};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    serde::Serialize,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    murmur_chat::Error as ChatError,
    murmur_protocol::{
        ErrorFrame, HandshakeFrame, MAX_PAYLOAD_BYTES, PresenceFrame, WRITE_TIMEOUT_MS,
        error_codes,
    },
};

use crate::{client::Client, state::AppState};

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn error_frame_for(e: &ChatError) -> ErrorFrame {
    let code = match e {
        ChatError::InvalidArgument { .. } => error_codes::INVALID_ARGUMENT,
        ChatError::NotFound { .. } => error_codes::NOT_FOUND,
        ChatError::SequenceNotInitialized | ChatError::Transport { .. } => error_codes::TRANSPORT,
    };
    ErrorFrame::new(code, e.to_string())
}

/// Drive one socket through its full lifecycle. The scope is detached from
/// the HTTP request so it outlives the upgrade handler.
pub async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    user_id: String,
    conv_id: String,
    force_new: bool,
) {
    // Identity resolution before anything is sent.
    let session = match state
        .manager
        .handle_connect(&user_id, &conv_id, force_new)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(conv_id, error = %e, "connect rejected");
            let mut socket = socket;
            let _ = socket
                .send(Message::Text(to_json(&error_frame_for(&e)).into()))
                .await;
            return;
        },
    };
    let sender_id = session.sender_id;
    let conversation_id = session.conversation_id;
    let conv_key = conversation_id.to_string();
    info!(
        conversation_id = %conversation_id,
        sender_id = %sender_id,
        is_new = session.is_new_identity,
        "ws: connection established"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client, mut out_rx) = Client::new(sender_id.to_string(), conv_key.clone());
    let client = Arc::new(client);

    // Write loop: sole writer on the socket, applying the per-frame
    // deadline. Any write failure closes the client.
    let write_cancel = client.closed_token();
    let write_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = write_cancel.cancelled() => break,
                frame = out_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let write = ws_tx.send(Message::Text(frame.into()));
                    match tokio::time::timeout(Duration::from_millis(WRITE_TIMEOUT_MS), write).await {
                        Ok(Ok(())) => {},
                        Ok(Err(e)) => {
                            debug!(error = %e, "ws: write failed");
                            write_cancel.cancel();
                            break;
                        },
                        Err(_) => {
                            debug!("ws: write deadline exceeded");
                            write_cancel.cancel();
                            break;
                        },
                    }
                },
            }
        }
    });

    // Handshake goes through the client queue so frame order is preserved.
    let handshake = HandshakeFrame::new(sender_id.to_string(), session.is_new_identity);
    if client.send(&to_json(&handshake)).is_err() {
        warn!(sender_id = %sender_id, "ws: handshake enqueue failed");
    }

    state.registry.register(Arc::clone(&client));
    // Seed the volatile index so lazy-create and teardown checks see this
    // member before the first fast heartbeat tick.
    state.manager.touch_online(conversation_id, sender_id);
    state.registry.send_presence(
        &conv_key,
        &PresenceFrame::new(state.manager.online_participants(conversation_id)),
    );

    // Presence timers run for the life of the connection.
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = {
        let manager = Arc::clone(&state.manager);
        let cancel = heartbeat_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.handle_heartbeat(cancel, sender_id, conversation_id).await {
                warn!(sender_id = %sender_id, error = %e, "heartbeat loop failed");
            }
        })
    };

    // ── Message loop ─────────────────────────────────────────────────────

    let read_cancel = client.closed_token();
    loop {
        tokio::select! {
            _ = read_cancel.cancelled() => break,
            msg = ws_rx.next() => {
                let Some(msg) = msg else { break };
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!(sender_id = %sender_id, error = %e, "ws: read error");
                        break;
                    },
                };
                if text.len() > MAX_PAYLOAD_BYTES {
                    warn!(sender_id = %sender_id, size = text.len(), "ws: frame too large");
                    let frame = ErrorFrame::new(error_codes::INVALID_ARGUMENT, "frame too large");
                    let _ = client.send(&to_json(&frame));
                    continue;
                }
                if let Err(e) = state
                    .manager
                    .handle_message(sender_id, conversation_id, text.as_bytes())
                    .await
                {
                    warn!(sender_id = %sender_id, error = %e, "ws: message rejected");
                    let _ = client.send(&to_json(&error_frame_for(&e)));
                }
            },
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────

    heartbeat_cancel.cancel();
    state.registry.unregister(&client);
    client.close();
    if let Err(e) = state.manager.handle_disconnect(sender_id, conversation_id).await {
        warn!(sender_id = %sender_id, error = %e, "disconnect handling failed");
    }
    state.registry.send_presence(
        &conv_key,
        &PresenceFrame::new(state.manager.online_participants(conversation_id)),
    );
    info!(sender_id = %sender_id, "ws: connection closed");

    let _ = heartbeat_handle.await;
    write_handle.abort();
}
