//! Gigdesk Shared Types and Utilities
//!
//! This crate contains the messaging domain types, errors, and database
//! helpers shared across the Gigdesk services.

pub mod db;
pub mod error;
pub mod types;

pub use db::*;
pub use error::*;
pub use types::*;
