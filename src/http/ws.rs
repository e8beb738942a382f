//! Websocket transport for the streaming channel
//!
//! Each socket is split into a reader task (wire → `Inbound`) and a writer
//! task (`Outgoing` → wire). The channel driver only ever sees the mpsc ends,
//! so all server messages go out in the order they were queued and every
//! audio frame is exactly one binary message.

use super::state::AppState;
use crate::protocol::{ClientMessage, ProtocolError};
use crate::session::{ChannelDriver, ChannelLink, Inbound, Outbound, Outgoing};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// GET /v1/guide/stream
/// Upgrade to the streaming guide channel
pub async fn stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    info!("Stream channel opened");

    let buffer = state.controller.config().outbound_buffer.max(1);
    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outgoing>(buffer);
    let (in_tx, in_rx) = mpsc::channel::<Inbound>(buffer);

    let writer = tokio::spawn(async move {
        while let Some(outgoing) = out_rx.recv().await {
            let message = match outgoing {
                Outgoing::Message(message) => match serde_json::to_string(&message) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        error!("Failed to serialize {} message: {}", message.kind(), e);
                        continue;
                    }
                },
                Outgoing::Frame(frame) => Message::Binary(frame),
            };

            if let Err(e) = sink.send(message).await {
                debug!("Socket write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(received) = source.next().await {
            let inbound = match received {
                Ok(Message::Text(text)) => match ClientMessage::decode(&text) {
                    Ok(message) => Inbound::Message(message),
                    Err(e) => Inbound::Invalid(e),
                },
                Ok(Message::Binary(_)) => Inbound::Invalid(ProtocolError::UnexpectedBinary),
                // Transport-level keepalive is answered by the socket itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!("Socket read failed: {}", e);
                    break;
                }
            };

            if in_tx.send(inbound).await.is_err() {
                return;
            }
        }
        let _ = in_tx.send(Inbound::Disconnected).await;
    });

    let driver = ChannelDriver::new(Arc::clone(&state.controller), state.replay.clone());
    driver
        .run(ChannelLink::new(in_rx, Outbound::new(out_tx)))
        .await;

    reader.abort();
    if let Err(e) = writer.await {
        debug!("Writer task ended abnormally: {}", e);
    }
    info!("Stream channel finished");
}
