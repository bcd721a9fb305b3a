use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use onboard_auth::{AccessTier, PermissionFlags};
use onboard_core::{
    BusinessId, DepartmentId, DomainError, DomainResult, PermissionId, RoleId, UserId,
    UserRoleId,
};

/// Name of the immutable department created with every business.
pub const ADMIN_DEPARTMENT: &str = "Admin";

/// Name of the bootstrap role inside the Admin department.
pub const GENERAL_ROLE: &str = "General";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Business {
    pub id: BusinessId,
    pub name: String,
    pub address: String,
    pub city: String,
    pub province: String,
    pub postal_code: String,
}

/// Registration form for a new tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBusiness {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub province: String,
    #[serde(default)]
    pub postal_code: String,
}

impl NewBusiness {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("business name must not be empty"));
        }
        Ok(())
    }
}

/// A user's relationship to one business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub accepted: bool,
    pub default_option: bool,
    pub token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub created_on: DateTime<Utc>,
}

impl Membership {
    pub fn is_default(&self) -> bool {
        self.accepted && self.default_option
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMembership {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub accepted: bool,
    pub default_option: bool,
    pub token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl NewMembership {
    /// A pending invitation carrying `token` until `expiry`.
    pub fn invitation(
        user_id: UserId,
        business_id: BusinessId,
        token: String,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            business_id,
            accepted: false,
            default_option: false,
            token: Some(token),
            token_expiry: Some(expiry),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Department {
    pub id: DepartmentId,
    pub business_id: BusinessId,
    pub name: String,
    pub prevent_edit: bool,
    pub prevent_delete: bool,
}

impl Department {
    pub fn is_admin(&self) -> bool {
        self.name == ADMIN_DEPARTMENT
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDepartment {
    pub business_id: BusinessId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub department_id: DepartmentId,
    pub name: String,
    pub access: AccessTier,
    pub permission_id: PermissionId,
    pub prevent_edit: bool,
    pub prevent_delete: bool,
}

/// A role together with its one-to-one permission flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRole {
    pub department_id: DepartmentId,
    pub name: String,
    pub access: AccessTier,
    pub permissions: PermissionFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: UserRoleId,
    pub user_id: UserId,
    pub role_id: RoleId,
    /// Denormalised from role -> department -> business at insert.
    pub business_id: BusinessId,
    pub primary_role_for_user: bool,
    pub updated_by_user_id: Option<UserId>,
}

/// Assignment request; the store derives the business from the role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUserRole {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub primary_role_for_user: bool,
    pub updated_by_user_id: Option<UserId>,
}

/// One of a user's role assignments, resolved down to its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    pub role_id: RoleId,
    pub department_id: DepartmentId,
    pub access: AccessTier,
    pub flags: PermissionFlags,
}

/// Everything written by a business registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrappedBusiness {
    pub business: Business,
    pub admin_department: Department,
    pub general_role: Role,
    pub membership: Membership,
    pub user_role: UserRole,
}
