/// API routes and handlers
pub mod content;
pub mod extract;
pub mod filter;
pub mod flags;
pub mod health;
pub mod queue;
pub mod reports;
pub mod users;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(flags::routes())
        .merge(reports::routes())
        .merge(content::routes())
        .merge(queue::routes())
        .merge(filter::routes())
        .merge(users::routes())
}
