//! Session resolution for every protected request.
//!
//! Identity comes from `x-user-id`; `x-business-id` optionally selects the
//! current business. The resolved [`SessionContext`] is stored as a request
//! extension.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use onboard_auth::SessionContext;
use onboard_core::{BusinessId, UserId};

use crate::app::errors::{authz_error_to_response, json_error};
use crate::app::Gate;

pub const USER_HEADER: &str = "x-user-id";
pub const BUSINESS_HEADER: &str = "x-business-id";

pub async fn session_middleware(
    State(gate): State<Arc<Gate>>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let user_id: UserId = header_id(req.headers(), USER_HEADER)?.ok_or_else(|| {
        json_error(
            StatusCode::UNAUTHORIZED,
            "unauthenticated",
            format!("missing {USER_HEADER} header"),
        )
    })?;
    let requested: Option<BusinessId> = header_id(req.headers(), BUSINESS_HEADER)?;

    let session: SessionContext = gate
        .memberships()
        .session_for(user_id, requested)
        .await
        .map_err(authz_error_to_response)?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

fn header_id<T>(headers: &HeaderMap, name: &'static str) -> Result<Option<T>, Response>
where
    T: std::str::FromStr,
{
    let Some(value) = headers.get(name) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .map(Some)
        .ok_or_else(|| {
            json_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("{name} must be an integer id"),
            )
        })
}
