use thiserror::Error;

use onboard_core::{BusinessId, DepartmentId, DomainError, RoleId, UserId};

/// Every way an authorization or context decision can fail.
///
/// Variants carry the offending ids so handlers can log them; the HTTP layer
/// decides which of them a client may see.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("user is not a member of business {0}")]
    NotAMember(BusinessId),

    #[error("user has no business membership")]
    NoMembership,

    #[error("user {0} has no default business membership")]
    NoDefaultSet(UserId),

    #[error("role {role} does not belong to business {business}")]
    RoleNotInBusiness { role: RoleId, business: BusinessId },

    #[error("user {user} is not a member of business {business}")]
    UserNotMember { user: UserId, business: BusinessId },

    #[error("business {business} has {count} admin departments")]
    MultipleAdminDepartments { business: BusinessId, count: usize },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is locked")]
    Locked(String),

    #[error("department {0} still has members")]
    DepartmentInUse(DepartmentId),

    #[error("role {0} is still assigned")]
    RoleInUse(RoleId),

    #[error("user {user} is already a member of business {business}")]
    AlreadyMember { user: UserId, business: BusinessId },

    #[error("invitation is invalid or expired")]
    InvalidInvitation,

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("storage failure: {0}")]
    Database(String),
}

impl AuthzError {
    /// Stable machine-readable code used in error bodies and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::NotAMember(_) => "not_a_member",
            AuthzError::NoMembership => "no_membership",
            AuthzError::NoDefaultSet(_) => "no_default_set",
            AuthzError::RoleNotInBusiness { .. } => "role_not_in_business",
            AuthzError::UserNotMember { .. } => "user_not_member",
            AuthzError::MultipleAdminDepartments { .. } => "multiple_admin_departments",
            AuthzError::Forbidden(_) => "forbidden",
            AuthzError::NotFound(_) => "not_found",
            AuthzError::Locked(_) => "locked",
            AuthzError::DepartmentInUse(_) => "department_in_use",
            AuthzError::RoleInUse(_) => "role_in_use",
            AuthzError::AlreadyMember { .. } => "already_member",
            AuthzError::InvalidInvitation => "invalid_invitation",
            AuthzError::Invalid(_) => "invalid_request",
            AuthzError::Database(_) => "database_error",
        }
    }

    /// Data-integrity problems that indicate a bug or corrupted rows rather
    /// than a bad request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthzError::NoDefaultSet(_)
                | AuthzError::MultipleAdminDepartments { .. }
                | AuthzError::Database(_)
        )
    }
}

impl From<DomainError> for AuthzError {
    fn from(err: DomainError) -> Self {
        AuthzError::Invalid(err.to_string())
    }
}
