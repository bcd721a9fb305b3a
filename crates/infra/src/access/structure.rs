use tracing::instrument;

use onboard_auth::{AccessTier, AuthzError};
use onboard_core::{BusinessId, DepartmentId, RoleId, UserId};

use super::aggregator::PermissionAggregator;
use super::hierarchy::DepartmentHierarchy;
use super::store_failure;
use crate::store::{Department, EntityStore, Role, StoreError};

/// Organisational records carrying edit/delete locks.
pub trait Lockable {
    fn prevent_edit(&self) -> bool;
    fn prevent_delete(&self) -> bool;
    /// Human-readable label for error messages.
    fn describe(&self) -> String;
}

impl Lockable for Department {
    fn prevent_edit(&self) -> bool {
        self.prevent_edit
    }

    fn prevent_delete(&self) -> bool {
        self.prevent_delete
    }

    fn describe(&self) -> String {
        format!("department {} ({})", self.id, self.name)
    }
}

impl Lockable for Role {
    fn prevent_edit(&self) -> bool {
        self.prevent_edit
    }

    fn prevent_delete(&self) -> bool {
        self.prevent_delete
    }

    fn describe(&self) -> String {
        format!("role {} ({})", self.id, self.name)
    }
}

/// Guards structural changes to departments and roles.
#[derive(Debug, Clone)]
pub struct StructureGuard<S> {
    store: S,
    hierarchy: DepartmentHierarchy<S>,
    aggregator: PermissionAggregator<S>,
}

impl<S: EntityStore + Clone> StructureGuard<S> {
    pub fn new(store: S) -> Self {
        Self {
            hierarchy: DepartmentHierarchy::new(store.clone()),
            aggregator: PermissionAggregator::new(store.clone()),
            store,
        }
    }

    pub fn ensure_editable<T: Lockable>(&self, item: &T) -> Result<(), AuthzError> {
        if item.prevent_edit() {
            return Err(AuthzError::Locked(item.describe()));
        }
        Ok(())
    }

    /// Delete an unlocked department that nobody holds a role in.
    #[instrument(
        skip(self),
        fields(acting_user_id = %acting_user_id, business_id = %business_id, department_id = %department_id)
    )]
    pub async fn delete_department(
        &self,
        acting_user_id: UserId,
        business_id: BusinessId,
        department_id: DepartmentId,
    ) -> Result<(), AuthzError> {
        self.require_admin(acting_user_id, business_id).await?;

        let department = self
            .hierarchy
            .department_in_business(business_id, department_id)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("department {department_id}")))?;
        if department.prevent_delete() {
            return Err(AuthzError::Locked(department.describe()));
        }

        let assigned = self
            .store
            .count_user_roles_in_department(department_id)
            .await
            .map_err(|e| store_failure("count_user_roles_in_department", e))?;
        if assigned > 0 {
            tracing::warn!(assigned, "department still has assigned roles");
            return Err(AuthzError::DepartmentInUse(department_id));
        }

        match self.store.delete_department(department_id).await {
            Ok(()) => {
                tracing::info!("department deleted");
                Ok(())
            }
            // An assignment landed between the count and the delete.
            Err(StoreError::ForeignKeyViolation(_)) => {
                Err(AuthzError::DepartmentInUse(department_id))
            }
            Err(StoreError::NotFound(_)) => {
                Err(AuthzError::NotFound(format!("department {department_id}")))
            }
            Err(e) => Err(store_failure("delete_department", e)),
        }
    }

    /// Delete an unlocked role that nobody holds.
    #[instrument(
        skip(self),
        fields(acting_user_id = %acting_user_id, business_id = %business_id, role_id = %role_id)
    )]
    pub async fn delete_role(
        &self,
        acting_user_id: UserId,
        business_id: BusinessId,
        role_id: RoleId,
    ) -> Result<(), AuthzError> {
        self.require_admin(acting_user_id, business_id).await?;

        let (role, _) = self
            .hierarchy
            .role_in_business(business_id, role_id)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("role {role_id}")))?;
        if role.prevent_delete() {
            return Err(AuthzError::Locked(role.describe()));
        }

        let assigned = self
            .store
            .count_user_roles_for_role(role_id)
            .await
            .map_err(|e| store_failure("count_user_roles_for_role", e))?;
        if assigned > 0 {
            tracing::warn!(assigned, "role is still assigned");
            return Err(AuthzError::RoleInUse(role_id));
        }

        self.store
            .delete_role(role_id)
            .await
            .map_err(|e| match e {
                StoreError::ForeignKeyViolation(_) => AuthzError::RoleInUse(role_id),
                StoreError::NotFound(_) => AuthzError::NotFound(format!("role {role_id}")),
                other => store_failure("delete_role", other),
            })?;
        tracing::info!("role deleted");
        Ok(())
    }

    /// Holds a MANAGER-tier role in the department that owns `role_id`.
    pub async fn is_manager_of_role(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        role_id: RoleId,
    ) -> Result<bool, AuthzError> {
        let Some((role, _)) = self.hierarchy.role_in_business(business_id, role_id).await? else {
            return Ok(false);
        };
        let held = self
            .store
            .role_grants_for_user(user_id, business_id)
            .await
            .map_err(|e| store_failure("role_grants_for_user", e))?;
        Ok(held
            .iter()
            .any(|r| r.department_id == role.department_id && r.access == AccessTier::Manager))
    }

    async fn require_admin(
        &self,
        acting_user_id: UserId,
        business_id: BusinessId,
    ) -> Result<(), AuthzError> {
        if self.aggregator.is_admin(acting_user_id, business_id).await? {
            Ok(())
        } else {
            tracing::warn!("structural change attempted by non-admin");
            Err(AuthzError::Forbidden(
                "only admins may change the organisation structure".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use onboard_auth::Grant;

    use super::*;
    use crate::access::fixtures::{Fixture, OWNER};
    use crate::store::{NewBusiness, NewDepartment};

    #[tokio::test]
    async fn admin_structure_is_locked() {
        let fx = Fixture::new().await;
        let guard = StructureGuard::new(fx.store.clone());

        assert!(matches!(
            guard.ensure_editable(&fx.boot.admin_department),
            Err(AuthzError::Locked(_))
        ));
        assert!(matches!(
            guard
                .delete_department(OWNER, fx.business(), fx.boot.admin_department.id)
                .await,
            Err(AuthzError::Locked(_))
        ));
        assert!(matches!(
            guard
                .delete_role(OWNER, fx.business(), fx.boot.general_role.id)
                .await,
            Err(AuthzError::Locked(_))
        ));
    }

    #[tokio::test]
    async fn department_with_assignments_cannot_be_deleted() {
        let fx = Fixture::new().await;
        let guard = StructureGuard::new(fx.store.clone());
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let user = fx.member(UserId::new(5)).await;
        fx.grant(user, clerk, true).await;

        assert_eq!(
            guard.delete_department(OWNER, fx.business(), sales).await,
            Err(AuthzError::DepartmentInUse(sales))
        );

        fx.store.delete_user_role(user, clerk).await.unwrap();
        guard.delete_department(OWNER, fx.business(), sales).await.unwrap();
        assert!(fx.store.department(sales).await.unwrap().is_none());
        assert!(fx.store.role(clerk).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_admins_change_structure() {
        let fx = Fixture::new().await;
        let guard = StructureGuard::new(fx.store.clone());
        let sales = fx.department("Sales").await;
        let lead = fx
            .role(sales, "Lead", AccessTier::Manager, &[Grant::DeptCrudRole])
            .await;
        let manager = fx.member(UserId::new(6)).await;
        fx.grant(manager, lead, true).await;

        assert!(matches!(
            guard.delete_department(manager, fx.business(), sales).await,
            Err(AuthzError::Forbidden(_))
        ));
        assert!(matches!(
            guard.delete_role(manager, fx.business(), lead).await,
            Err(AuthzError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn assigned_role_is_refused_until_unassigned() {
        let fx = Fixture::new().await;
        let guard = StructureGuard::new(fx.store.clone());
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let user = fx.member(UserId::new(7)).await;
        fx.grant(user, clerk, true).await;

        let err = guard.delete_role(OWNER, fx.business(), clerk).await.unwrap_err();
        assert_eq!(err, AuthzError::RoleInUse(clerk));
        assert_eq!(
            fx.store
                .user_roles_in_business(user, fx.business())
                .await
                .unwrap()
                .len(),
            1
        );

        assert!(fx.store.delete_user_role(user, clerk).await.unwrap());
        guard.delete_role(OWNER, fx.business(), clerk).await.unwrap();
        assert!(fx.store.role(clerk).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_structure_is_not_found() {
        let fx = Fixture::new().await;
        let guard = StructureGuard::new(fx.store.clone());
        let other = fx
            .store
            .bootstrap_business(UserId::new(2), NewBusiness::named("Other"))
            .await
            .unwrap();
        let foreign = fx
            .store
            .insert_department(NewDepartment {
                business_id: other.business.id,
                name: "Sales".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            guard.delete_department(OWNER, fx.business(), foreign.id).await,
            Err(AuthzError::NotFound(_))
        ));
        assert!(matches!(
            guard
                .delete_role(OWNER, fx.business(), other.general_role.id)
                .await,
            Err(AuthzError::NotFound(_))
        ));
        assert!(fx.store.department(foreign.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn managers_manage_roles_in_their_department_only() {
        let fx = Fixture::new().await;
        let guard = StructureGuard::new(fx.store.clone());
        let sales = fx.department("Sales").await;
        let ops = fx.department("Ops").await;
        let lead = fx.role(sales, "Lead", AccessTier::Manager, &[]).await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let picker = fx.role(ops, "Picker", AccessTier::User, &[]).await;
        let manager = fx.member(UserId::new(8)).await;
        fx.grant(manager, lead, true).await;

        assert!(guard.is_manager_of_role(manager, fx.business(), clerk).await.unwrap());
        assert!(!guard.is_manager_of_role(manager, fx.business(), picker).await.unwrap());
    }
}
