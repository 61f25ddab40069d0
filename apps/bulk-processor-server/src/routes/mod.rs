//! Route modules for the bulk processor server

pub mod files;
pub mod health;
pub mod tasks;
pub mod upload;

use axum::Router;

use crate::state::AppState;

/// Assemble every route on top of the shared state
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(upload::router())
        .merge(tasks::router())
        .merge(files::router())
        .with_state(state)
}
