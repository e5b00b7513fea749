//! API routes

pub mod health;
pub mod messages;
pub mod tickets;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
    Router,
};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Every API route needs the caller identity - under /api/v1
    let protected_api_routes = Router::new()
        // Messages
        .route("/messages", post(messages::send_message))
        .route("/messages/unread-count", get(messages::unread_count))
        .route("/messages/:message_id/read", patch(messages::mark_message_read))
        .route("/orders/:order_id/messages", get(messages::list_order_messages))
        .route("/orders/:order_id/messages/read", post(messages::mark_order_read))
        .route("/direct/:peer_id/messages", get(messages::list_direct_messages))
        .route("/direct/:peer_id/messages/read", post(messages::mark_direct_read))
        // Tickets
        .route("/tickets", get(tickets::list_tickets))
        .route("/orders/:order_id/ticket", patch(tickets::update_ticket_status))
        // Real-time events
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", protected_api_routes)
        .layer(DefaultBodyLimit::max(256 * 1024))
        .with_state(state)
}
