use serde::{Deserialize, Serialize};

use onboard_core::{RoleId, UserId, UserRoleId};

/// Body of both role assignment endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleAssignmentRequest {
    pub role_id: RoleId,
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleAssignmentResponse {
    pub user_role_ids: Vec<UserRoleId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InviteRequest {
    pub user_id: UserId,
}
