//! HTTP application wiring.
//!
//! - `routes/`: handlers, one file per resource
//! - `dto.rs`: request and response bodies
//! - `errors.rs`: error-to-response mapping

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

use onboard_infra::{AuthorizationGate, EntityStore};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Store handle shared by every request.
pub type SharedStore = Arc<dyn EntityStore>;

/// Gate over the shared store, as handlers see it.
pub type Gate = AuthorizationGate<SharedStore>;

/// Build the full HTTP router.
pub fn build_app(store: SharedStore) -> Router {
    let gate = Arc::new(AuthorizationGate::new(store));

    // Everything except health needs an identified user.
    let protected = routes::router()
        .layer(Extension(gate.clone()))
        .layer(axum::middleware::from_fn_with_state(
            gate,
            middleware::session_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
