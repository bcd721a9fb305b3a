use axum::{routing::get, Router};

pub mod businesses;
pub mod members;
pub mod structure;
pub mod system;

/// Router for all endpoints that need a session.
pub fn router() -> Router {
    Router::new()
        .route("/settings/nav", get(system::nav))
        .nest("/businesses", businesses::router())
        .nest("/members", members::router())
        .merge(structure::router())
}
