//! WebSocket connection handler.
//!
//! Each accepted socket runs three pieces:
//! - a writer task draining the connection's outbound queue into the socket
//! - a dispatch task handling inbound frames one at a time, in arrival order
//! - the reader loop feeding the dispatch queue and tracking pongs

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Connection, Outbound};
use crate::error::RealtimeError;
use crate::hub::{ConnectionHub, DisconnectReason};
use crate::message::{ERROR_EVENT, OutboundMessage};

/// Time the writer gets to flush the close frame after teardown.
const WRITER_CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Query parameters for WebSocket connection.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Optional JWT token for authentication
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(hub): State<ConnectionHub>,
) -> impl IntoResponse {
    let max_message_size = hub.config().max_message_size;
    ws.max_message_size(max_message_size)
        .max_frame_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, query.token, hub))
}

/// Drives one WebSocket connection until it is torn down.
async fn handle_socket(socket: WebSocket, token: Option<String>, hub: ConnectionHub) {
    let queue_size = hub.config().max_queue_size.max(1);
    let (tx, mut rx) = mpsc::channel::<Outbound>(queue_size);
    let conn = hub.connect(tx, token);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Writer: holds only the id so the connection can be dropped once torn down
    let writer_hub = hub.clone();
    let writer_id = conn.id().clone();
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let (message, closing) = match frame {
                Outbound::Text(text) => (Message::Text(text.into()), false),
                Outbound::Ping => (Message::Ping(Bytes::new()), false),
                Outbound::Close => (Message::Close(None), true),
            };
            if let Err(e) = ws_sender.send(message).await {
                debug!(conn_id = %writer_id, error = %e, "WebSocket write failed");
                writer_hub.disconnect(&writer_id, DisconnectReason::TransportError);
                break;
            }
            if closing {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Dispatcher: one message at a time per connection
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<String>(queue_size);
    let dispatch_hub = hub.clone();
    let dispatch_conn = Arc::clone(&conn);
    tokio::spawn(async move {
        while let Some(text) = inbound_rx.recv().await {
            dispatch_hub.handle_text(&dispatch_conn, &text).await;
        }
    });

    let reason = loop {
        tokio::select! {
            () = conn.closed() => break None,
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                        break Some(DisconnectReason::TransportError);
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if inbound_tx.send(text).await.is_err() {
                            break Some(DisconnectReason::TransportError);
                        }
                    }
                    Err(_) => reject_binary(&conn).await,
                },
                Some(Ok(Message::Pong(_))) => hub.handle_pong(&conn),
                // Pings are answered by the transport
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) | None => break Some(DisconnectReason::ClientClosed),
                Some(Err(e)) => {
                    warn!(conn_id = %conn.id(), error = %e, "WebSocket error");
                    break Some(DisconnectReason::TransportError);
                }
            },
        }
    };

    drop(inbound_tx);
    if let Some(reason) = reason {
        hub.terminate(conn.id(), reason);
    }

    // A writer stuck on a dead peer would otherwise hold the socket until the TCP timeout
    if tokio::time::timeout(WRITER_CLOSE_GRACE, &mut writer).await.is_err() {
        debug!(conn_id = %conn.id(), "Socket writer did not finish, aborting");
        writer.abort();
    }
}

async fn reject_binary(conn: &Connection) {
    let err = RealtimeError::Parse("Binary frames must contain UTF-8 JSON".to_string());
    if let Err(e) = conn
        .send_message(&OutboundMessage::error(ERROR_EVENT, &err))
        .await
    {
        debug!(conn_id = %conn.id(), error = %e, "Error frame dropped");
    }
}
