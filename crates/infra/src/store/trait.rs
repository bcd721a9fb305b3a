use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use onboard_core::{BusinessId, DepartmentId, RoleId, UserId};

use super::records::{
    BootstrappedBusiness, Business, Department, Membership, NewBusiness, NewDepartment,
    NewMembership, NewRole, NewUserRole, Role, RoleGrant, UserRole,
};

/// Entity store operation error.
///
/// Infrastructure failures only; components translate these into
/// `AuthzError` before they reach a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("referenced row missing: {0}")]
    ForeignKeyViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

/// Relational tenant state.
///
/// ## Invariants enforced here, not by callers
///
/// - at most one accepted default membership per user
/// - at most one primary role assignment per (user, business)
/// - at most one department named `Admin` per business
/// - a user holds a given role at most once
///
/// A write that would break one of these fails with
/// [`StoreError::UniqueViolation`] and leaves the store unchanged.
#[async_trait::async_trait]
pub trait EntityStore: Send + Sync {
    // ── memberships ──────────────────────────────────────────────────────

    /// All memberships of a user, accepted or not, newest first.
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError>;

    async fn membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Option<Membership>, StoreError>;

    async fn membership_by_token(&self, token: &str) -> Result<Option<Membership>, StoreError>;

    async fn insert_membership(&self, membership: NewMembership) -> Result<Membership, StoreError>;

    /// Replace the invitation token of a pending membership.
    async fn refresh_invitation(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        token: String,
        expiry: DateTime<Utc>,
    ) -> Result<Membership, StoreError>;

    /// Mark a membership accepted and clear its token. It becomes the
    /// default iff the user has no accepted default yet.
    async fn accept_membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Membership, StoreError>;

    /// Move the default flag from `from` to `to` atomically.
    ///
    /// Fails with `NotFound` when either row is not an accepted membership
    /// in the expected state; nothing is written in that case.
    async fn flip_default_membership(
        &self,
        user_id: UserId,
        from: BusinessId,
        to: BusinessId,
    ) -> Result<(), StoreError>;

    // ── businesses ───────────────────────────────────────────────────────

    /// Create a business with its Admin department, General role and
    /// all-true permission, plus the registrant's membership and primary
    /// role assignment, in one transaction.
    async fn bootstrap_business(
        &self,
        registrant: UserId,
        business: NewBusiness,
    ) -> Result<BootstrappedBusiness, StoreError>;

    async fn business(&self, business_id: BusinessId) -> Result<Option<Business>, StoreError>;

    // ── departments ──────────────────────────────────────────────────────

    async fn department(&self, department_id: DepartmentId)
        -> Result<Option<Department>, StoreError>;

    async fn departments_named(
        &self,
        business_id: BusinessId,
        name: &str,
    ) -> Result<Vec<Department>, StoreError>;

    async fn insert_department(&self, department: NewDepartment) -> Result<Department, StoreError>;

    /// Delete a department with its roles and their permissions.
    async fn delete_department(&self, department_id: DepartmentId) -> Result<(), StoreError>;

    // ── roles ────────────────────────────────────────────────────────────

    async fn role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError>;

    async fn roles_in_department(&self, department_id: DepartmentId)
        -> Result<Vec<Role>, StoreError>;

    async fn insert_role(&self, role: NewRole) -> Result<Role, StoreError>;

    /// Delete an unassigned role and its permission.
    ///
    /// Fails with `ForeignKeyViolation` while any user holds the role.
    async fn delete_role(&self, role_id: RoleId) -> Result<(), StoreError>;

    // ── role assignments ─────────────────────────────────────────────────

    /// Every role the user holds in the business, with department and flags.
    async fn role_grants_for_user(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<RoleGrant>, StoreError>;

    async fn user_in_department(
        &self,
        user_id: UserId,
        department_id: DepartmentId,
    ) -> Result<bool, StoreError>;

    async fn user_roles_in_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<UserRole>, StoreError>;

    /// Fails with `NotFound` when the role does not exist.
    async fn insert_user_role(&self, user_role: NewUserRole) -> Result<UserRole, StoreError>;

    /// Returns whether a row was removed.
    async fn delete_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool, StoreError>;

    async fn count_user_roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<u64, StoreError>;

    async fn count_user_roles_for_role(&self, role_id: RoleId) -> Result<u64, StoreError>;
}

#[async_trait::async_trait]
impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        (**self).memberships_for_user(user_id).await
    }

    async fn membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Option<Membership>, StoreError> {
        (**self).membership(user_id, business_id).await
    }

    async fn membership_by_token(&self, token: &str) -> Result<Option<Membership>, StoreError> {
        (**self).membership_by_token(token).await
    }

    async fn insert_membership(&self, membership: NewMembership) -> Result<Membership, StoreError> {
        (**self).insert_membership(membership).await
    }

    async fn refresh_invitation(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        token: String,
        expiry: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        (**self)
            .refresh_invitation(user_id, business_id, token, expiry)
            .await
    }

    async fn accept_membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Membership, StoreError> {
        (**self).accept_membership(user_id, business_id).await
    }

    async fn flip_default_membership(
        &self,
        user_id: UserId,
        from: BusinessId,
        to: BusinessId,
    ) -> Result<(), StoreError> {
        (**self).flip_default_membership(user_id, from, to).await
    }

    async fn bootstrap_business(
        &self,
        registrant: UserId,
        business: NewBusiness,
    ) -> Result<BootstrappedBusiness, StoreError> {
        (**self).bootstrap_business(registrant, business).await
    }

    async fn business(&self, business_id: BusinessId) -> Result<Option<Business>, StoreError> {
        (**self).business(business_id).await
    }

    async fn department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        (**self).department(department_id).await
    }

    async fn departments_named(
        &self,
        business_id: BusinessId,
        name: &str,
    ) -> Result<Vec<Department>, StoreError> {
        (**self).departments_named(business_id, name).await
    }

    async fn insert_department(&self, department: NewDepartment) -> Result<Department, StoreError> {
        (**self).insert_department(department).await
    }

    async fn delete_department(&self, department_id: DepartmentId) -> Result<(), StoreError> {
        (**self).delete_department(department_id).await
    }

    async fn role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        (**self).role(role_id).await
    }

    async fn roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Vec<Role>, StoreError> {
        (**self).roles_in_department(department_id).await
    }

    async fn insert_role(&self, role: NewRole) -> Result<Role, StoreError> {
        (**self).insert_role(role).await
    }

    async fn delete_role(&self, role_id: RoleId) -> Result<(), StoreError> {
        (**self).delete_role(role_id).await
    }

    async fn role_grants_for_user(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<RoleGrant>, StoreError> {
        (**self).role_grants_for_user(user_id, business_id).await
    }

    async fn user_in_department(
        &self,
        user_id: UserId,
        department_id: DepartmentId,
    ) -> Result<bool, StoreError> {
        (**self).user_in_department(user_id, department_id).await
    }

    async fn user_roles_in_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<UserRole>, StoreError> {
        (**self).user_roles_in_business(user_id, business_id).await
    }

    async fn insert_user_role(&self, user_role: NewUserRole) -> Result<UserRole, StoreError> {
        (**self).insert_user_role(user_role).await
    }

    async fn delete_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool, StoreError> {
        (**self).delete_user_role(user_id, role_id).await
    }

    async fn count_user_roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<u64, StoreError> {
        (**self).count_user_roles_in_department(department_id).await
    }

    async fn count_user_roles_for_role(&self, role_id: RoleId) -> Result<u64, StoreError> {
        (**self).count_user_roles_for_role(role_id).await
    }
}
