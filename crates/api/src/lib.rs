//! Gigdesk API Library
//!
//! Order and direct messaging, ticket summaries and real-time delivery for
//! the Gigdesk marketplace.

pub mod auth;
pub mod config;
pub mod error;
pub mod messaging;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
