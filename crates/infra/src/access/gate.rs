use chrono::{DateTime, Utc};
use tracing::instrument;

use onboard_auth::{
    authorize, authorize_role_assignment, explain_authorization, AuthzError, Capabilities, Grant,
    NavLinks, SessionContext,
};
use onboard_core::{BusinessId, DepartmentId, RoleId, UserId, UserRoleId};

use super::aggregator::PermissionAggregator;
use super::context::BusinessContextSwitcher;
use super::hierarchy::DepartmentHierarchy;
use super::invitation::{Invitation, Invitations};
use super::membership::MembershipResolver;
use super::primary_role::PrimaryRoleTracker;
use super::registration::BusinessRegistration;
use super::structure::StructureGuard;
use crate::store::EntityStore;

/// Grants that allow inviting new members.
const INVITE_GRANTS: [Grant; 1] = [Grant::GlobalCrudUsers];

/// Single entry point for authorization decisions.
///
/// Every check re-reads the store, so role changes take effect on the
/// next request.
#[derive(Debug, Clone)]
pub struct AuthorizationGate<S> {
    memberships: MembershipResolver<S>,
    context: BusinessContextSwitcher<S>,
    hierarchy: DepartmentHierarchy<S>,
    aggregator: PermissionAggregator<S>,
    primary_roles: PrimaryRoleTracker<S>,
    invitations: Invitations<S>,
    registration: BusinessRegistration<S>,
    structure: StructureGuard<S>,
}

impl<S: EntityStore + Clone> AuthorizationGate<S> {
    pub fn new(store: S) -> Self {
        Self {
            memberships: MembershipResolver::new(store.clone()),
            context: BusinessContextSwitcher::new(store.clone()),
            hierarchy: DepartmentHierarchy::new(store.clone()),
            aggregator: PermissionAggregator::new(store.clone()),
            primary_roles: PrimaryRoleTracker::new(store.clone()),
            invitations: Invitations::new(store.clone()),
            registration: BusinessRegistration::new(store.clone()),
            structure: StructureGuard::new(store),
        }
    }

    pub fn memberships(&self) -> &MembershipResolver<S> {
        &self.memberships
    }

    pub fn context(&self) -> &BusinessContextSwitcher<S> {
        &self.context
    }

    pub fn hierarchy(&self) -> &DepartmentHierarchy<S> {
        &self.hierarchy
    }

    pub fn aggregator(&self) -> &PermissionAggregator<S> {
        &self.aggregator
    }

    pub fn primary_roles(&self) -> &PrimaryRoleTracker<S> {
        &self.primary_roles
    }

    pub fn invitations(&self) -> &Invitations<S> {
        &self.invitations
    }

    pub fn registration(&self) -> &BusinessRegistration<S> {
        &self.registration
    }

    pub fn structure(&self) -> &StructureGuard<S> {
        &self.structure
    }

    pub async fn is_admin(&self, user_id: UserId, business_id: BusinessId) -> Result<bool, AuthzError> {
        self.aggregator.is_admin(user_id, business_id).await
    }

    pub async fn is_manager(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<bool, AuthzError> {
        self.aggregator.is_manager(user_id, business_id).await
    }

    /// Strictly grant-based; admin standing is not consulted.
    pub async fn has_permission(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        required: &[Grant],
    ) -> Result<bool, AuthzError> {
        self.aggregator
            .has_permission(user_id, business_id, required)
            .await
    }

    /// Capabilities of the session's user in its current business.
    pub async fn capabilities(&self, session: &SessionContext) -> Result<Capabilities, AuthzError> {
        let business_id = acting_business(session)?;
        self.aggregator
            .capabilities(session.user_id, business_id)
            .await
    }

    /// Admins pass; everyone else needs one of `required`.
    #[instrument(skip(self, session), fields(user_id = %session.user_id, required = ?required))]
    pub async fn authorize(
        &self,
        session: &SessionContext,
        required: &[Grant],
    ) -> Result<Capabilities, AuthzError> {
        let capabilities = self.capabilities(session).await?;
        if let Err(err) = authorize(session, &capabilities, required) {
            let explanation = explain_authorization(&capabilities, required);
            tracing::warn!(
                business_id = %capabilities.business_id,
                reason = %explanation.reason,
                "authorization denied"
            );
            return Err(err);
        }
        Ok(capabilities)
    }

    /// [`Self::authorize`] as a yes/no answer. Store failures deny.
    pub async fn allows(&self, session: &SessionContext, required: &[Grant]) -> bool {
        match self.authorize(session, required).await {
            Ok(_) => true,
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(error = %err, "authorization check failed; denying");
                }
                false
            }
        }
    }

    /// May the session's user add `target_user` to, or remove them from,
    /// `role_id`?
    #[instrument(
        skip(self, session),
        fields(user_id = %session.user_id, target_user = %target_user, role_id = %role_id)
    )]
    pub async fn authorize_role_assignment(
        &self,
        session: &SessionContext,
        target_user: UserId,
        role_id: RoleId,
    ) -> Result<(), AuthzError> {
        let business_id = acting_business(session)?;
        if target_user == session.user_id {
            return Err(AuthzError::Forbidden(
                "cannot change your own role assignments".to_string(),
            ));
        }

        let (role, _) = self
            .hierarchy
            .role_in_business(business_id, role_id)
            .await?
            .ok_or(AuthzError::RoleNotInBusiness {
                role: role_id,
                business: business_id,
            })?;

        let capabilities = self
            .aggregator
            .capabilities(session.user_id, business_id)
            .await?;
        match authorize_role_assignment(&capabilities, target_user, role.department_id) {
            Ok(()) => Ok(()),
            Err(denied) => {
                if self
                    .structure
                    .is_manager_of_role(session.user_id, business_id, role_id)
                    .await?
                {
                    return Ok(());
                }
                tracing::warn!(error = %denied, "role assignment denied");
                Err(denied)
            }
        }
    }

    /// Assign `role_id` to every user in `user_ids`. All targets are
    /// authorized before anything is written.
    pub async fn assign_role(
        &self,
        session: &SessionContext,
        role_id: RoleId,
        user_ids: &[UserId],
    ) -> Result<Vec<UserRoleId>, AuthzError> {
        let business_id = acting_business(session)?;
        for user_id in user_ids {
            self.authorize_role_assignment(session, *user_id, role_id).await?;
        }
        let mut assigned = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            assigned.push(
                self.primary_roles
                    .assign(business_id, session.user_id, *user_id, role_id)
                    .await?,
            );
        }
        Ok(assigned)
    }

    /// Remove `role_id` from every user in `user_ids`, authorizing all first.
    pub async fn unassign_role(
        &self,
        session: &SessionContext,
        role_id: RoleId,
        user_ids: &[UserId],
    ) -> Result<(), AuthzError> {
        let business_id = acting_business(session)?;
        for user_id in user_ids {
            self.authorize_role_assignment(session, *user_id, role_id).await?;
        }
        for user_id in user_ids {
            self.primary_roles
                .remove(business_id, *user_id, role_id)
                .await?;
        }
        Ok(())
    }

    /// Invite `user_id` into the session's current business.
    pub async fn invite(
        &self,
        session: &SessionContext,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Invitation, AuthzError> {
        let capabilities = self.authorize(session, &INVITE_GRANTS).await?;
        self.invitations
            .invite(capabilities.business_id, session.user_id, user_id, now)
            .await
    }

    pub async fn delete_department(
        &self,
        session: &SessionContext,
        department_id: DepartmentId,
    ) -> Result<(), AuthzError> {
        let business_id = acting_business(session)?;
        self.structure
            .delete_department(session.user_id, business_id, department_id)
            .await
    }

    pub async fn delete_role(&self, session: &SessionContext, role_id: RoleId) -> Result<(), AuthzError> {
        let business_id = acting_business(session)?;
        self.structure
            .delete_role(session.user_id, business_id, role_id)
            .await
    }

    /// Navigation for the session's user.
    pub async fn nav(&self, session: &SessionContext) -> Result<NavLinks, AuthzError> {
        let capabilities = self.capabilities(session).await?;
        Ok(NavLinks::for_capabilities(&capabilities))
    }
}

/// The session's current business, provided the session lists it.
fn acting_business(session: &SessionContext) -> Result<BusinessId, AuthzError> {
    let business_id = session.require_business()?;
    if !session.is_member_of(business_id) {
        return Err(AuthzError::NotAMember(business_id));
    }
    Ok(business_id)
}
