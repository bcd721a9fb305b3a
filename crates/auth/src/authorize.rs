use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use onboard_core::{BusinessId, DepartmentId, UserId};

use crate::{AuthzError, Grant, PermissionFlags, SessionContext};

/// What a user may do inside one business.
///
/// Assembled by the store-backed resolver from the user's roles; this type
/// itself performs no IO. Grants remember which departments' roles carry
/// them so department-scoped checks can be narrowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub is_admin: bool,
    pub is_manager: bool,
    grants: BTreeMap<Grant, BTreeSet<DepartmentId>>,
}

impl Capabilities {
    /// No standing at all. Also the fail-closed result.
    pub fn none(user_id: UserId, business_id: BusinessId) -> Self {
        Self {
            user_id,
            business_id,
            is_admin: false,
            is_manager: false,
            grants: BTreeMap::new(),
        }
    }

    /// Fold one role's flags into the union.
    pub fn add_role(&mut self, department_id: DepartmentId, flags: PermissionFlags) {
        for grant in flags.granted() {
            self.grants.entry(grant).or_default().insert(department_id);
        }
    }

    /// Union of every flag across the user's roles in this business.
    pub fn effective_grants(&self) -> BTreeSet<Grant> {
        self.grants.keys().copied().collect()
    }

    /// `true` iff any of `required` is held. An empty list grants nothing.
    pub fn has_any(&self, required: &[Grant]) -> bool {
        required.iter().any(|g| self.grants.contains_key(g))
    }

    /// Departments whose roles carry `grant`.
    pub fn granting_departments(&self, grant: Grant) -> impl Iterator<Item = DepartmentId> + '_ {
        self.grants.get(&grant).into_iter().flatten().copied()
    }

    pub fn has_in_department(&self, grant: Grant, department_id: DepartmentId) -> bool {
        self.grants
            .get(&grant)
            .is_some_and(|depts| depts.contains(&department_id))
    }
}

/// Grants that allow changing another member's roles.
pub const ROLE_ASSIGNMENT_GRANTS: [Grant; 3] = [
    Grant::GlobalCrudUsers,
    Grant::GlobalAssignUsersToRole,
    Grant::DeptAssignUsersToRole,
];

/// Authorize a request within the session's current business.
///
/// Admins pass unconditionally; everyone else needs at least one of
/// `required`.
pub fn authorize(
    session: &SessionContext,
    capabilities: &Capabilities,
    required: &[Grant],
) -> Result<(), AuthzError> {
    let business_id = session.require_business()?;
    if capabilities.business_id != business_id || capabilities.user_id != session.user_id {
        return Err(AuthzError::NotAMember(business_id));
    }

    if capabilities.is_admin || capabilities.has_any(required) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(format!(
            "requires one of [{}]",
            join(required)
        )))
    }
}

/// Authorize adding or removing `target_user` on a role in `role_department`.
///
/// A department-scoped grant only covers roles in a department whose own
/// roles carry that grant. Nobody edits their own assignments.
pub fn authorize_role_assignment(
    capabilities: &Capabilities,
    target_user: UserId,
    role_department: DepartmentId,
) -> Result<(), AuthzError> {
    if target_user == capabilities.user_id {
        return Err(AuthzError::Forbidden(
            "cannot change your own role assignments".to_string(),
        ));
    }
    let covered = ROLE_ASSIGNMENT_GRANTS.iter().any(|&grant| {
        if grant.is_department_scoped() {
            capabilities.has_in_department(grant, role_department)
        } else {
            capabilities.has_any(&[grant])
        }
    });
    if capabilities.is_admin || covered {
        return Ok(());
    }
    Err(AuthzError::Forbidden(format!(
        "no assignment grant covering department {role_department}"
    )))
}

fn join(grants: &[Grant]) -> String {
    grants
        .iter()
        .map(|g| g.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation
// ─────────────────────────────────────────────────────────────────────────────

/// Why a capability check came out the way it did.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required: Vec<Grant>,
    pub granted: bool,
    pub reason: String,
    pub is_admin: bool,
    pub effective_grants: Vec<Grant>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    NoGrantsRequired,
    MissingGrant,
}

/// Explain the decision [`authorize`] would make for these capabilities.
pub fn explain_authorization(
    capabilities: &Capabilities,
    required: &[Grant],
) -> AuthorizationExplanation {
    let effective_grants: Vec<Grant> = capabilities.effective_grants().into_iter().collect();
    let matched: Vec<Grant> = required
        .iter()
        .copied()
        .filter(|g| capabilities.has_any(&[*g]))
        .collect();

    let (granted, reason, denial_reason) = if capabilities.is_admin {
        (true, "member of the Admin department".to_string(), None)
    } else if !matched.is_empty() {
        (true, format!("holds [{}]", join(&matched)), None)
    } else if required.is_empty() {
        (
            false,
            "no grants requested".to_string(),
            Some(DenialReason {
                kind: DenialKind::NoGrantsRequired,
                message: "an empty requirement never matches".to_string(),
            }),
        )
    } else {
        (
            false,
            format!("holds none of [{}]", join(required)),
            Some(DenialReason {
                kind: DenialKind::MissingGrant,
                message: format!(
                    "effective grants are [{}]",
                    join(&effective_grants)
                ),
            }),
        )
    };

    AuthorizationExplanation {
        required: required.to_vec(),
        granted,
        reason,
        is_admin: capabilities.is_admin,
        effective_grants,
        denial_reason,
    }
}
