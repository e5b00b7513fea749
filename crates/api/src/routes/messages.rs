//! Message routes
//!
//! Order and direct conversation history, sends and read receipts.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use gigdesk_shared::{ConversationKey, Message, MessageId, OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    messaging::SendRequest,
    state::AppState,
};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub order_id: Option<OrderId>,
    /// Must match the caller when present
    #[serde(default)]
    pub sender_id: Option<UserId>,
    pub receiver_id: UserId,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

fn direct_conversation(caller: UserId, peer: UserId) -> ApiResult<ConversationKey> {
    if caller == peer {
        return Err(ApiError::Validation(
            "a direct conversation needs two different users".to_string(),
        ));
    }
    Ok(ConversationKey::direct(caller, peer))
}

// =============================================================================
// Handlers
// =============================================================================

/// Send a message as the caller
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Json<Message>> {
    if req.sender_id.is_some_and(|sender| sender != auth_user.user_id) {
        return Err(ApiError::Forbidden);
    }

    let message = state
        .messages
        .send(SendRequest {
            order_id: req.order_id,
            sender_id: auth_user.user_id,
            receiver_id: req.receiver_id,
            body: req.body,
        })
        .await?;

    Ok(Json(message))
}

/// History of an order conversation
pub async fn list_order_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<OrderId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = state
        .messages
        .history(
            auth_user.user_id,
            ConversationKey::Order(order_id),
            query.limit,
            query.offset,
        )
        .await?;

    Ok(Json(messages))
}

/// History of the direct conversation with `peer_id`
pub async fn list_direct_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(peer_id): Path<UserId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let conversation = direct_conversation(auth_user.user_id, peer_id)?;
    let messages = state
        .messages
        .history(auth_user.user_id, conversation, query.limit, query.offset)
        .await?;

    Ok(Json(messages))
}

/// Mark every message of an order conversation addressed to the caller as read
pub async fn mark_order_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<OrderId>,
) -> ApiResult<Json<MarkReadResponse>> {
    let message_ids = state
        .messages
        .mark_conversation_read(auth_user.user_id, ConversationKey::Order(order_id))
        .await?;

    Ok(Json(MarkReadResponse { message_ids }))
}

/// Mark every direct message from `peer_id` as read
pub async fn mark_direct_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(peer_id): Path<UserId>,
) -> ApiResult<Json<MarkReadResponse>> {
    let conversation = direct_conversation(auth_user.user_id, peer_id)?;
    let message_ids = state
        .messages
        .mark_conversation_read(auth_user.user_id, conversation)
        .await?;

    Ok(Json(MarkReadResponse { message_ids }))
}

/// Mark a single message as read
pub async fn mark_message_read(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Json<MarkReadResponse>> {
    let message_ids = state
        .messages
        .mark_message_read(auth_user.user_id, message_id)
        .await?;

    Ok(Json(MarkReadResponse { message_ids }))
}

/// Unread messages addressed to the caller
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UnreadCountResponse>> {
    let unread_count = state.messages.unread_count(auth_user.user_id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}
