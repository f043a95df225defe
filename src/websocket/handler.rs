//! WebSocket Handler
//!
//! Upgrades `/ws` requests and runs the per-connection read/write loops.
//! A session token may be passed as `?token=...` to unlock the caller's
//! `users.{id}` topic.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::hub::ConnectionHub;
use super::messages::{ClientMessage, ServerMessage};
use crate::api::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user_id = params
        .token
        .as_deref()
        .and_then(|token| match state.auth.validate(token) {
            Ok((_, user)) => Some(user.id),
            Err(e) => {
                tracing::debug!(error = %e, "WebSocket token rejected, connecting anonymously");
                None
            }
        });

    let hub = Arc::clone(&state.ws_hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, user_id))
}

fn encode(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            tracing::error!(error = %e, "Unserializable server message");
            None
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionHub>, user_id: Option<i64>) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerMessage>();

    let id = match hub.register(outbox, user_id).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Socket refused");
            if let Some(frame) = encode(&ServerMessage::Error { message: e.to_string() }) {
                let _ = sink.send(frame).await;
            }
            return;
        }
    };

    let hello = encode(&ServerMessage::Connected {
        connection_id: id.clone(),
        user_id,
    });
    let greeted = match hello {
        Some(frame) => sink.send(frame).await.is_ok(),
        None => false,
    };
    if !greeted {
        hub.unregister(&id).await;
        return;
    }

    // Outbound: everything the hub queues for this socket
    let writer_id = id.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            let Some(frame) = encode(&message) else { continue };
            if sink.send(frame).await.is_err() {
                tracing::debug!(connection_id = %writer_id, "Peer gone, writer stops");
                break;
            }
        }
    });

    // Inbound: client commands until close or error
    let reader_hub = Arc::clone(&hub);
    let reader_id = id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let keep_open = match frame {
                Ok(frame) => handle_ws_message(&reader_hub, &reader_id, frame).await,
                Err(e) => {
                    tracing::debug!(connection_id = %reader_id, error = %e, "Read failed");
                    false
                }
            };
            if !keep_open {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    hub.unregister(&id).await;
}

/// Returns false when the connection should be closed
async fn handle_ws_message(hub: &ConnectionHub, connection_id: &str, message: Message) -> bool {
    match message {
        Message::Text(text) => {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(hub, connection_id, client_msg).await,
                Err(e) => {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Invalid client message");
                    let _ = hub
                        .send_to(
                            connection_id,
                            ServerMessage::Error {
                                message: format!("Invalid message format: {}", e),
                            },
                        )
                        .await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let _ = hub
                .send_to(
                    connection_id,
                    ServerMessage::Error {
                        message: "Binary messages not supported".to_string(),
                    },
                )
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            tracing::debug!(connection_id = %connection_id, "Client requested close");
            false
        }
    }
}

async fn handle_client_message(hub: &ConnectionHub, connection_id: &str, message: ClientMessage) {
    let response = match message {
        ClientMessage::Subscribe { topics } => hub
            .subscribe(connection_id, topics)
            .await
            .map(|topics| ServerMessage::Subscribed { topics }),
        ClientMessage::Unsubscribe { topics } => hub
            .unsubscribe(connection_id, topics)
            .await
            .map(|topics| ServerMessage::Unsubscribed { topics }),
        ClientMessage::Ping => Ok(ServerMessage::Pong),
    };

    let response = response.unwrap_or_else(|e| {
        tracing::error!(connection_id = %connection_id, error = %e, "Subscription error");
        ServerMessage::Error {
            message: e.to_string(),
        }
    });
    let _ = hub.send_to(connection_id, response).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::HubConfig;

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx, None).await.unwrap();

        let keep_open = handle_ws_message(&hub, &id, Message::Text(r#"{"type":"ping"}"#.to_string())).await;

        assert!(keep_open);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_invalid_json_reports_error() {
        let hub = ConnectionHub::new(HubConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = hub.register(tx, None).await.unwrap();

        handle_ws_message(&hub, &id, Message::Text("not json".to_string())).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Error { .. }));
        assert!(!handle_ws_message(&hub, &id, Message::Close(None)).await);
    }
}
