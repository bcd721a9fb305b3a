use std::collections::BTreeSet;

use tracing::instrument;

use onboard_auth::{AccessTier, AuthzError, Capabilities, Grant};
use onboard_core::{BusinessId, UserId};

use super::hierarchy::DepartmentHierarchy;
use super::store_failure;
use crate::store::{EntityStore, RoleGrant};

/// Folds a user's role assignments in one business into capabilities.
///
/// Unknown businesses and users without roles yield no standing at all;
/// only store failures and integrity faults are errors.
#[derive(Debug, Clone)]
pub struct PermissionAggregator<S> {
    store: S,
    hierarchy: DepartmentHierarchy<S>,
}

impl<S: EntityStore + Clone> PermissionAggregator<S> {
    pub fn new(store: S) -> Self {
        Self {
            hierarchy: DepartmentHierarchy::new(store.clone()),
            store,
        }
    }

    /// Placement in the Admin department, whatever the role's tier or flags.
    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id))]
    pub async fn is_admin(&self, user_id: UserId, business_id: BusinessId) -> Result<bool, AuthzError> {
        match self.hierarchy.admin_department(business_id).await {
            Ok(admin) => self.hierarchy.is_user_in_department(user_id, admin.id).await,
            Err(AuthzError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Holds a MANAGER-tier role and is not an admin.
    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id))]
    pub async fn is_manager(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<bool, AuthzError> {
        if self.is_admin(user_id, business_id).await? {
            return Ok(false);
        }
        let roles = self.role_grants(user_id, business_id).await?;
        Ok(roles.iter().any(|r| r.access == AccessTier::Manager))
    }

    /// Union of every flag set on any of the user's roles in the business.
    pub async fn effective_grants(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<BTreeSet<Grant>, AuthzError> {
        Ok(self
            .role_grants(user_id, business_id)
            .await?
            .iter()
            .flat_map(|r| r.flags.granted())
            .collect())
    }

    /// True iff the user holds at least one of `required`.
    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id, required = ?required))]
    pub async fn has_permission(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        required: &[Grant],
    ) -> Result<bool, AuthzError> {
        let grants = self.effective_grants(user_id, business_id).await?;
        Ok(required.iter().any(|g| grants.contains(g)))
    }

    /// Everything above in one pass, for callers making several checks.
    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id))]
    pub async fn capabilities(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Capabilities, AuthzError> {
        let is_admin = self.is_admin(user_id, business_id).await?;
        let roles = self.role_grants(user_id, business_id).await?;

        let mut capabilities = Capabilities::none(user_id, business_id);
        capabilities.is_admin = is_admin;
        capabilities.is_manager = !is_admin && roles.iter().any(|r| r.access == AccessTier::Manager);
        for role in &roles {
            capabilities.add_role(role.department_id, role.flags);
        }
        Ok(capabilities)
    }

    async fn role_grants(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<RoleGrant>, AuthzError> {
        self.store
            .role_grants_for_user(user_id, business_id)
            .await
            .map_err(|e| store_failure("role_grants_for_user", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{Fixture, OWNER};

    #[tokio::test]
    async fn stranger_has_no_standing() {
        let fx = Fixture::new().await;
        let aggregator = PermissionAggregator::new(fx.store.clone());
        let stranger = UserId::new(50);

        assert!(!aggregator.is_admin(stranger, fx.business()).await.unwrap());
        assert!(!aggregator.is_manager(stranger, fx.business()).await.unwrap());
        assert!(aggregator
            .effective_grants(stranger, fx.business())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_business_fails_closed() {
        let fx = Fixture::new().await;
        let aggregator = PermissionAggregator::new(fx.store.clone());
        let nowhere = BusinessId::new(4040);

        assert!(!aggregator.is_admin(OWNER, nowhere).await.unwrap());
        assert!(!aggregator.is_manager(OWNER, nowhere).await.unwrap());
        assert!(!aggregator
            .has_permission(OWNER, nowhere, &[Grant::GlobalCrudUsers])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn registrant_is_admin_with_every_flag() {
        let fx = Fixture::new().await;
        let aggregator = PermissionAggregator::new(fx.store.clone());

        assert!(aggregator.is_admin(OWNER, fx.business()).await.unwrap());
        assert!(!aggregator.is_manager(OWNER, fx.business()).await.unwrap());
        assert_eq!(
            aggregator.effective_grants(OWNER, fx.business()).await.unwrap().len(),
            Grant::ALL.len()
        );
    }

    #[tokio::test]
    async fn admin_department_alone_makes_an_admin() {
        let fx = Fixture::new().await;
        let plain = fx
            .role(fx.boot.admin_department.id, "Intern", AccessTier::User, &[])
            .await;
        let intern = fx.member(UserId::new(3)).await;
        fx.grant(intern, plain, true).await;

        let aggregator = PermissionAggregator::new(fx.store.clone());
        assert!(aggregator.is_admin(intern, fx.business()).await.unwrap());
        assert!(aggregator
            .effective_grants(intern, fx.business())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn one_flag_on_one_role_is_enough() {
        let fx = Fixture::new().await;
        let ops = fx.department("Operations").await;
        let clerk = fx.role(ops, "Clerk", AccessTier::User, &[]).await;
        let planner = fx
            .role(ops, "Planner", AccessTier::User, &[Grant::GlobalCrudDepartment])
            .await;
        let user = fx.member(UserId::new(4)).await;
        fx.grant(user, clerk, true).await;
        fx.grant(user, planner, false).await;

        let aggregator = PermissionAggregator::new(fx.store.clone());
        assert!(aggregator
            .has_permission(user, fx.business(), &[Grant::GlobalCrudDepartment])
            .await
            .unwrap());
        assert!(aggregator
            .has_permission(
                user,
                fx.business(),
                &[Grant::GlobalCrudRole, Grant::GlobalCrudDepartment]
            )
            .await
            .unwrap());
        assert!(!aggregator
            .has_permission(user, fx.business(), &[Grant::GlobalCrudRole])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn manager_tier_outside_admin_is_a_manager() {
        let fx = Fixture::new().await;
        let sales = fx.department("Sales").await;
        let lead = fx
            .role(sales, "Lead", AccessTier::Manager, &[Grant::DeptAssignUsersToRole])
            .await;
        let user = fx.member(UserId::new(5)).await;
        fx.grant(user, lead, true).await;

        let aggregator = PermissionAggregator::new(fx.store.clone());
        let caps = aggregator.capabilities(user, fx.business()).await.unwrap();
        assert!(caps.is_manager && !caps.is_admin);
        assert!(caps.has_in_department(Grant::DeptAssignUsersToRole, sales));
        assert!(aggregator.is_manager(user, fx.business()).await.unwrap());
    }
}
