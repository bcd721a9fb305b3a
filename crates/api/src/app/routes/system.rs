use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use onboard_auth::SessionContext;

use crate::app::{errors, Gate};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /settings/nav
pub async fn nav(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
) -> axum::response::Response {
    match gate.nav(&session).await {
        Ok(nav) => (StatusCode::OK, Json(nav)).into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}
