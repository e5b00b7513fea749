//! Ticket routes

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use gigdesk_shared::{OrderId, TicketStatus};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::ApiResult,
    messaging::{TicketChange, TicketSummary},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct UpdateTicketRequest {
    pub status: TicketStatus,
}

/// Tickets of every order the caller is a party to
pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<TicketSummary>>> {
    let tickets = state.tickets.list_tickets(auth_user.user_id).await?;
    Ok(Json(tickets))
}

/// Open or close the ticket of an order
pub async fn update_ticket_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(order_id): Path<OrderId>,
    Json(req): Json<UpdateTicketRequest>,
) -> ApiResult<Json<TicketChange>> {
    let change = state
        .messages
        .set_ticket_status(order_id, req.status, auth_user.user_id)
        .await?;

    Ok(Json(change))
}
