//! Great Nigeria community moderation core
//!
//! Library half of the moderation server: the Core components under
//! [`moderation`] and the axum transport that wraps them.

#[macro_use]
mod macros;

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod metrics;
pub mod moderation;
pub mod server;

pub use context::AppContext;
pub use error::{ModResult, ModerationError};
