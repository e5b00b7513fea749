//! WebSocket handler for Axum
//!
//! Handles WebSocket connections and routes client events into the messaging
//! core. Failures are reported to the originating connection only.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{stream::StreamExt, SinkExt};
use gigdesk_shared::{ChatError, ErrorKind, RoomKey, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::{auth::AuthUser, messaging::SendRequest, state::AppState};

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
};

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// The caller identity has already been attached by the auth middleware.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Response {
    tracing::info!(user_id = %auth_user.user_id, "WebSocket connection upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, auth_user.user_id, app_state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: UserId, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for sending events to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Register the connection; it joins its own user room
    let ws_state = app_state.ws_state.clone();
    let conn = ws_state.add_connection(Connection::new(user_id, tx)).await;
    let session_id = conn.session_id;

    // Send connection acknowledgment
    let _ = conn.send(ServerEvent::Connected {
        session_id,
        user_id,
    });

    // Spawn task to send messages to client
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // Serialize and send event
            match serde_json::to_string(&event) {
                Ok(json) => {
                    if sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize WebSocket event");
                }
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = ?e, "WebSocket receive error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(event, &conn, &app_state).await,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "Failed to parse client event"
                    );
                    let _ = conn.send(ServerEvent::Error {
                        kind: Some(ErrorKind::ValidationError),
                        message: format!("Invalid event format: {}", e),
                    });
                }
            },
            Message::Close(_) => {
                tracing::info!(session_id = %session_id, "WebSocket close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Axum handles ping/pong automatically
            }
            Message::Binary(_) => {} // Ignore binary messages
        }
    }

    // Cleanup on disconnect; writes that already succeeded stay persisted
    tracing::info!(session_id = %session_id, user_id = %user_id, "WebSocket connection closing");
    ws_state.remove_connection(&session_id).await;

    send_task.abort();
}

/// Handle client event
async fn handle_client_event(event: ClientEvent, conn: &Arc<Connection>, app_state: &AppState) {
    use ClientEvent::*;

    let rooms = &app_state.ws_state.rooms;
    let messages = &app_state.messages;

    match event {
        Identify { user_id } => {
            if user_id != conn.user_id {
                send_error(conn, &ChatError::Forbidden);
                return;
            }
            join_room(conn, app_state, RoomKey::User(user_id)).await;
        }

        Join { room } => {
            if let Err(e) = messages.resolver().authorize_room(&room, conn.user_id).await {
                tracing::debug!(
                    session_id = %conn.session_id,
                    room = %room,
                    error = %e,
                    "Room join rejected"
                );
                send_error(conn, &e);
                return;
            }
            join_room(conn, app_state, room).await;
        }

        Leave { room } => {
            rooms.leave(&room, conn).await;
            let _ = conn.send(ServerEvent::Left { room });
        }

        SendMessage {
            order_id,
            receiver_id,
            body,
        } => {
            let request = SendRequest {
                order_id,
                sender_id: conn.user_id,
                receiver_id,
                body,
            };
            match messages.send(request).await {
                Ok(message) => {
                    let _ = conn.send(ServerEvent::MessageSent { message });
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %conn.session_id,
                        error = %e,
                        "Rejected send_message"
                    );
                    send_error(conn, &e);
                }
            }
        }

        MarkRead { conversation } => {
            match messages
                .mark_conversation_read(conn.user_id, conversation)
                .await
            {
                Ok(message_ids) => {
                    let _ = conn.send(ServerEvent::MarkedRead {
                        conversation,
                        message_ids,
                    });
                }
                Err(e) => send_error(conn, &e),
            }
        }

        TypingStart { conversation } => {
            let room = RoomKey::Conversation(conversation);
            if !conn.is_subscribed(&room).await {
                send_error(conn, &ChatError::Validation("join the conversation first".into()));
                return;
            }
            rooms
                .broadcast(
                    &room,
                    ServerEvent::UserTypingStart {
                        conversation,
                        user_id: conn.user_id,
                    },
                )
                .await;
        }

        TypingStop { conversation } => {
            let room = RoomKey::Conversation(conversation);
            if !conn.is_subscribed(&room).await {
                return;
            }
            rooms
                .broadcast(
                    &room,
                    ServerEvent::UserTypingStop {
                        conversation,
                        user_id: conn.user_id,
                    },
                )
                .await;
        }

        Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}

async fn join_room(conn: &Arc<Connection>, app_state: &AppState, room: RoomKey) {
    if app_state.ws_state.rooms.join(room, Arc::clone(conn)).await {
        let _ = conn.send(ServerEvent::Joined { room });
    }
}

/// Report a failure to this connection only
fn send_error(conn: &Connection, err: &ChatError) {
    let kind = err.kind();
    let message = if kind == ErrorKind::TransientStoreError {
        tracing::error!(session_id = %conn.session_id, error = %err, "Message store error");
        "Message store unavailable, retry later".to_string()
    } else {
        err.to_string()
    };

    let _ = conn.send(ServerEvent::Error {
        kind: Some(kind),
        message,
    });
}
