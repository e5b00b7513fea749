//! WebSocket support for real-time messaging
//!
//! Delivers new messages, read receipts, ticket status changes and typing
//! indicators to connected clients.
//!
//! # Architecture
//!
//! - **Connection**: One authenticated WebSocket connection
//! - **Room**: Conversation and per-user rooms for broadcasting events
//! - **State**: WebSocket state shared across all connections
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe event definitions for client/server communication

pub mod connection;
pub mod events;
pub mod handler;
pub mod room;
pub mod state;

pub use handler::ws_handler;
pub use room::{EventSink, RoomManager};
pub use state::WebSocketState;
