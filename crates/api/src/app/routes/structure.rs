use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::delete,
    Router,
};

use onboard_auth::SessionContext;
use onboard_core::{DepartmentId, RoleId};

use crate::app::{errors, Gate};

pub fn router() -> Router {
    Router::new()
        .route("/departments/:id", delete(delete_department))
        .route("/roles/:id", delete(delete_role))
}

/// DELETE /departments/:id
pub async fn delete_department(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<DepartmentId>,
) -> axum::response::Response {
    match gate.delete_department(&session, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// DELETE /roles/:id
pub async fn delete_role(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Path(id): Path<RoleId>,
) -> axum::response::Response {
    match gate.delete_role(&session, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}
