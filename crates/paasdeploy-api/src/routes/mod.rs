//! API routes.

pub mod applications;
pub mod deployments;
pub mod events;
pub mod health;
pub mod nodes;

use axum::Router;

use crate::AppState;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/applications", applications::router())
        .nest("/deployments", deployments::router())
        .nest("/nodes", nodes::router())
        .nest("/events", events::router())
}
