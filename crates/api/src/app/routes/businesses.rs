use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use onboard_auth::SessionContext;
use onboard_core::BusinessId;
use onboard_infra::store::NewBusiness;

use crate::app::{errors, Gate};

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_businesses).post(register_business))
        .route("/:id", post(set_current).put(set_default))
}

/// GET /businesses
pub async fn list_businesses(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
) -> axum::response::Response {
    match gate.memberships().list_memberships(session.user_id).await {
        Ok(memberships) => (
            StatusCode::OK,
            Json(json!({
                "current_business_id": session.current_business_id(),
                "memberships": memberships,
            })),
        )
            .into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// POST /businesses
pub async fn register_business(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Json(business): Json<NewBusiness>,
) -> axum::response::Response {
    match gate
        .registration()
        .register_business(session.user_id, business)
        .await
    {
        Ok(registered) => (StatusCode::CREATED, Json(registered)).into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// POST /businesses/:id, switch the current business. Returns the new session.
pub async fn set_current(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<BusinessId>,
) -> axum::response::Response {
    match gate.context().set_current(&session, id) {
        Ok(next) => (StatusCode::OK, Json(next)).into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// PUT /businesses/:id, make it the user's default business.
pub async fn set_default(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<BusinessId>,
) -> axum::response::Response {
    match gate.context().set_default(session.user_id, id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "default_business_id": id }))).into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}
