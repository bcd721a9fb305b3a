use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{post, put},
    Json, Router,
};
use chrono::Utc;

use onboard_auth::SessionContext;

use crate::app::dto::{InviteRequest, RoleAssignmentRequest, RoleAssignmentResponse};
use crate::app::{errors, Gate};

pub fn router() -> Router {
    Router::new()
        .route("/role_assignment", post(assign_role).delete(unassign_role))
        .route("/invite", post(invite))
        .route("/invite/:token", put(accept_invitation))
}

/// POST /members/role_assignment
pub async fn assign_role(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<RoleAssignmentRequest>,
) -> axum::response::Response {
    match gate.assign_role(&session, req.role_id, &req.user_ids).await {
        Ok(user_role_ids) => (
            StatusCode::OK,
            Json(RoleAssignmentResponse { user_role_ids }),
        )
            .into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// DELETE /members/role_assignment
pub async fn unassign_role(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<RoleAssignmentRequest>,
) -> axum::response::Response {
    match gate.unassign_role(&session, req.role_id, &req.user_ids).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// POST /members/invite
pub async fn invite(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<InviteRequest>,
) -> axum::response::Response {
    match gate.invite(&session, req.user_id, Utc::now()).await {
        Ok(invitation) => (StatusCode::CREATED, Json(invitation)).into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}

/// PUT /members/invite/:token
pub async fn accept_invitation(
    Extension(gate): Extension<Arc<Gate>>,
    Extension(session): Extension<SessionContext>,
    Path(token): Path<String>,
) -> axum::response::Response {
    match gate
        .invitations()
        .accept_invitation(session.user_id, &token, Utc::now())
        .await
    {
        Ok(membership) => (StatusCode::OK, Json(membership)).into_response(),
        Err(e) => errors::authz_error_to_response(e),
    }
}
