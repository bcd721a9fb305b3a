use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use onboard_auth::AuthzError;

pub fn authz_error_to_response(err: AuthzError) -> Response {
    let status = match &err {
        AuthzError::NotAMember(_) | AuthzError::NoMembership | AuthzError::Forbidden(_) => {
            StatusCode::FORBIDDEN
        }
        AuthzError::RoleNotInBusiness { .. }
        | AuthzError::UserNotMember { .. }
        | AuthzError::InvalidInvitation
        | AuthzError::AlreadyMember { .. }
        | AuthzError::Invalid(_) => StatusCode::BAD_REQUEST,
        AuthzError::NotFound(_) => StatusCode::NOT_FOUND,
        AuthzError::Locked(_) => StatusCode::METHOD_NOT_ALLOWED,
        AuthzError::DepartmentInUse(_) | AuthzError::RoleInUse(_) => StatusCode::CONFLICT,
        AuthzError::NoDefaultSet(_)
        | AuthzError::MultipleAdminDepartments { .. }
        | AuthzError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    // Internal details stay in the logs.
    let message = if err.is_internal() {
        "internal error".to_string()
    } else {
        err.to_string()
    };
    json_error(status, err.code(), message)
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
