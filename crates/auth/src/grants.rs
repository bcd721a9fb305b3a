//! Named boolean capabilities ("grants").
//!
//! The set is closed: every flag a `Permission` row can carry has a variant
//! here, and the wire/database spelling is the snake_case variant name.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::nav::NavCategory;

/// Whether a grant applies business-wide or only to the department of the
/// role that carries it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantScope {
    Global,
    Department,
}

/// A single named capability.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    GlobalCrudUsers,
    GlobalCrudDepartment,
    GlobalCrudRole,
    GlobalCrudResources,
    GlobalAssignUsersToDepartment,
    GlobalAssignUsersToRole,
    GlobalAssignResourcesToDepartment,
    GlobalAssignResourcesToRole,
    GlobalViewReports,
    DeptCrudRole,
    DeptCrudResources,
    DeptAssignUsersToRole,
    DeptAssignResourcesToRole,
    DeptViewReports,
}

impl Grant {
    /// Every grant, global flags first.
    pub const ALL: [Grant; 14] = [
        Grant::GlobalCrudUsers,
        Grant::GlobalCrudDepartment,
        Grant::GlobalCrudRole,
        Grant::GlobalCrudResources,
        Grant::GlobalAssignUsersToDepartment,
        Grant::GlobalAssignUsersToRole,
        Grant::GlobalAssignResourcesToDepartment,
        Grant::GlobalAssignResourcesToRole,
        Grant::GlobalViewReports,
        Grant::DeptCrudRole,
        Grant::DeptCrudResources,
        Grant::DeptAssignUsersToRole,
        Grant::DeptAssignResourcesToRole,
        Grant::DeptViewReports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::GlobalCrudUsers => "global_crud_users",
            Grant::GlobalCrudDepartment => "global_crud_department",
            Grant::GlobalCrudRole => "global_crud_role",
            Grant::GlobalCrudResources => "global_crud_resources",
            Grant::GlobalAssignUsersToDepartment => "global_assign_users_to_department",
            Grant::GlobalAssignUsersToRole => "global_assign_users_to_role",
            Grant::GlobalAssignResourcesToDepartment => "global_assign_resources_to_department",
            Grant::GlobalAssignResourcesToRole => "global_assign_resources_to_role",
            Grant::GlobalViewReports => "global_view_reports",
            Grant::DeptCrudRole => "dept_crud_role",
            Grant::DeptCrudResources => "dept_crud_resources",
            Grant::DeptAssignUsersToRole => "dept_assign_users_to_role",
            Grant::DeptAssignResourcesToRole => "dept_assign_resources_to_role",
            Grant::DeptViewReports => "dept_view_reports",
        }
    }

    pub fn scope(&self) -> GrantScope {
        match self {
            Grant::DeptCrudRole
            | Grant::DeptCrudResources
            | Grant::DeptAssignUsersToRole
            | Grant::DeptAssignResourcesToRole
            | Grant::DeptViewReports => GrantScope::Department,
            _ => GrantScope::Global,
        }
    }

    pub fn is_department_scoped(&self) -> bool {
        self.scope() == GrantScope::Department
    }

    /// Navigation area a grant unlocks for non-admin users.
    ///
    /// Grants that only touch resources (manuals, quizzes) open nothing beyond
    /// the links every member already sees.
    pub fn nav_category(&self) -> Option<NavCategory> {
        match self {
            Grant::GlobalCrudUsers
            | Grant::GlobalAssignUsersToDepartment
            | Grant::GlobalAssignUsersToRole
            | Grant::DeptAssignUsersToRole => Some(NavCategory::Members),
            Grant::GlobalCrudDepartment | Grant::GlobalAssignResourcesToDepartment => {
                Some(NavCategory::Departments)
            }
            Grant::GlobalCrudRole
            | Grant::GlobalAssignResourcesToRole
            | Grant::DeptCrudRole
            | Grant::DeptAssignResourcesToRole => Some(NavCategory::Roles),
            Grant::GlobalViewReports | Grant::DeptViewReports => Some(NavCategory::Reports),
            Grant::GlobalCrudResources | Grant::DeptCrudResources => None,
        }
    }
}

impl core::fmt::Display for Grant {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown grant name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown grant '{0}'")]
pub struct UnknownGrant(pub String);

impl FromStr for Grant {
    type Err = UnknownGrant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Grant::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| UnknownGrant(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for grant in Grant::ALL {
            assert_eq!(grant.as_str().parse::<Grant>().unwrap(), grant);
        }
        assert!("global_crud_everything".parse::<Grant>().is_err());
    }

    #[test]
    fn serde_spelling_matches_column_names() {
        let json = serde_json::to_string(&Grant::GlobalAssignUsersToRole).unwrap();
        assert_eq!(json, "\"global_assign_users_to_role\"");
    }

    #[test]
    fn dept_prefix_means_department_scope() {
        for grant in Grant::ALL {
            assert_eq!(
                grant.is_department_scoped(),
                grant.as_str().starts_with("dept_"),
                "{grant}"
            );
        }
    }

    #[test]
    fn resource_grants_have_no_nav_category() {
        assert_eq!(Grant::GlobalCrudResources.nav_category(), None);
        assert_eq!(Grant::DeptCrudResources.nav_category(), None);
        assert_eq!(
            Grant::GlobalAssignUsersToDepartment.nav_category(),
            Some(NavCategory::Members)
        );
        assert_eq!(Grant::DeptViewReports.nav_category(), Some(NavCategory::Reports));
    }
}
