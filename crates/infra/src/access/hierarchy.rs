use tracing::instrument;

use onboard_auth::AuthzError;
use onboard_core::{BusinessId, DepartmentId, RoleId, UserId};

use super::store_failure;
use crate::store::{Department, EntityStore, Role, ADMIN_DEPARTMENT};

/// Traversal of business -> department -> role.
#[derive(Debug, Clone)]
pub struct DepartmentHierarchy<S> {
    store: S,
}

impl<S: EntityStore> DepartmentHierarchy<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The business's Admin department.
    ///
    /// More than one is an integrity fault and is reported, never resolved.
    #[instrument(skip(self), fields(business_id = %business_id))]
    pub async fn admin_department(&self, business_id: BusinessId) -> Result<Department, AuthzError> {
        let mut departments = self
            .store
            .departments_named(business_id, ADMIN_DEPARTMENT)
            .await
            .map_err(|e| store_failure("departments_named", e))?;

        match departments.len() {
            0 => Err(AuthzError::NotFound(format!(
                "admin department of business {business_id}"
            ))),
            1 => Ok(departments.remove(0)),
            count => {
                tracing::error!(
                    business_id = %business_id,
                    count,
                    "business has more than one admin department"
                );
                Err(AuthzError::MultipleAdminDepartments {
                    business: business_id,
                    count,
                })
            }
        }
    }

    /// True iff the user holds any role in the department.
    #[instrument(skip(self), fields(user_id = %user_id, department_id = %department_id))]
    pub async fn is_user_in_department(
        &self,
        user_id: UserId,
        department_id: DepartmentId,
    ) -> Result<bool, AuthzError> {
        self.store
            .user_in_department(user_id, department_id)
            .await
            .map_err(|e| store_failure("user_in_department", e))
    }

    /// The department, if it exists and belongs to `business_id`.
    pub async fn department_in_business(
        &self,
        business_id: BusinessId,
        department_id: DepartmentId,
    ) -> Result<Option<Department>, AuthzError> {
        let department = self
            .store
            .department(department_id)
            .await
            .map_err(|e| store_failure("department", e))?;
        Ok(department.filter(|d| d.business_id == business_id))
    }

    /// The role and its department, if the role belongs to `business_id`.
    pub async fn role_in_business(
        &self,
        business_id: BusinessId,
        role_id: RoleId,
    ) -> Result<Option<(Role, Department)>, AuthzError> {
        let Some(role) = self
            .store
            .role(role_id)
            .await
            .map_err(|e| store_failure("role", e))?
        else {
            return Ok(None);
        };
        let department = self
            .department_in_business(business_id, role.department_id)
            .await?;
        Ok(department.map(|d| (role, d)))
    }
}
