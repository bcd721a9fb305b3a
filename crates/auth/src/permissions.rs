use serde::{Deserialize, Serialize};

use crate::Grant;

/// The boolean flag set stored one-to-one with a role.
///
/// Field names are the column names; everything defaults to `false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionFlags {
    pub global_crud_users: bool,
    pub global_crud_department: bool,
    pub global_crud_role: bool,
    pub global_crud_resources: bool,
    pub global_assign_users_to_department: bool,
    pub global_assign_users_to_role: bool,
    pub global_assign_resources_to_department: bool,
    pub global_assign_resources_to_role: bool,
    pub global_view_reports: bool,
    pub dept_crud_role: bool,
    pub dept_crud_resources: bool,
    pub dept_assign_users_to_role: bool,
    pub dept_assign_resources_to_role: bool,
    pub dept_view_reports: bool,
}

impl PermissionFlags {
    /// No capability at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every flag set; carried by the bootstrap General role.
    pub fn all() -> Self {
        Self::from_grants(Grant::ALL)
    }

    pub fn from_grants(grants: impl IntoIterator<Item = Grant>) -> Self {
        let mut flags = Self::none();
        for grant in grants {
            flags.set(grant, true);
        }
        flags
    }

    pub fn get(&self, grant: Grant) -> bool {
        match grant {
            Grant::GlobalCrudUsers => self.global_crud_users,
            Grant::GlobalCrudDepartment => self.global_crud_department,
            Grant::GlobalCrudRole => self.global_crud_role,
            Grant::GlobalCrudResources => self.global_crud_resources,
            Grant::GlobalAssignUsersToDepartment => self.global_assign_users_to_department,
            Grant::GlobalAssignUsersToRole => self.global_assign_users_to_role,
            Grant::GlobalAssignResourcesToDepartment => self.global_assign_resources_to_department,
            Grant::GlobalAssignResourcesToRole => self.global_assign_resources_to_role,
            Grant::GlobalViewReports => self.global_view_reports,
            Grant::DeptCrudRole => self.dept_crud_role,
            Grant::DeptCrudResources => self.dept_crud_resources,
            Grant::DeptAssignUsersToRole => self.dept_assign_users_to_role,
            Grant::DeptAssignResourcesToRole => self.dept_assign_resources_to_role,
            Grant::DeptViewReports => self.dept_view_reports,
        }
    }

    pub fn set(&mut self, grant: Grant, value: bool) {
        let slot = match grant {
            Grant::GlobalCrudUsers => &mut self.global_crud_users,
            Grant::GlobalCrudDepartment => &mut self.global_crud_department,
            Grant::GlobalCrudRole => &mut self.global_crud_role,
            Grant::GlobalCrudResources => &mut self.global_crud_resources,
            Grant::GlobalAssignUsersToDepartment => &mut self.global_assign_users_to_department,
            Grant::GlobalAssignUsersToRole => &mut self.global_assign_users_to_role,
            Grant::GlobalAssignResourcesToDepartment => {
                &mut self.global_assign_resources_to_department
            }
            Grant::GlobalAssignResourcesToRole => &mut self.global_assign_resources_to_role,
            Grant::GlobalViewReports => &mut self.global_view_reports,
            Grant::DeptCrudRole => &mut self.dept_crud_role,
            Grant::DeptCrudResources => &mut self.dept_crud_resources,
            Grant::DeptAssignUsersToRole => &mut self.dept_assign_users_to_role,
            Grant::DeptAssignResourcesToRole => &mut self.dept_assign_resources_to_role,
            Grant::DeptViewReports => &mut self.dept_view_reports,
        };
        *slot = value;
    }

    /// Grants whose flag is `true`, in declaration order.
    pub fn granted(&self) -> impl Iterator<Item = Grant> + '_ {
        Grant::ALL.into_iter().filter(move |g| self.get(*g))
    }
}
