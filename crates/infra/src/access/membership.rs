use serde::Serialize;
use tracing::instrument;

use onboard_auth::{AuthzError, SessionContext};
use onboard_core::{BusinessId, UserId};

use super::store_failure;
use crate::store::EntityStore;

/// One accepted membership as seen by its user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MembershipSummary {
    pub business_id: BusinessId,
    pub default: bool,
}

/// Answers "which businesses does this user belong to".
#[derive(Debug, Clone)]
pub struct MembershipResolver<S> {
    store: S,
}

impl<S: EntityStore> MembershipResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Accepted memberships, newest first. Pending invitations are excluded.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_memberships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<MembershipSummary>, AuthzError> {
        let memberships = self
            .store
            .memberships_for_user(user_id)
            .await
            .map_err(|e| store_failure("memberships_for_user", e))?;

        Ok(memberships
            .into_iter()
            .filter(|m| m.accepted)
            .map(|m| MembershipSummary {
                business_id: m.business_id,
                default: m.default_option,
            })
            .collect())
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn default_business(&self, user_id: UserId) -> Result<BusinessId, AuthzError> {
        let memberships = self.list_memberships(user_id).await?;
        if memberships.is_empty() {
            return Err(AuthzError::NoMembership);
        }
        memberships
            .iter()
            .find(|m| m.default)
            .map(|m| m.business_id)
            .ok_or(AuthzError::NoDefaultSet(user_id))
    }

    /// Build the request context for `user_id`.
    ///
    /// `requested` selects the current business and must be one of the
    /// user's accepted memberships. Without it the default business is used,
    /// falling back to the newest membership.
    #[instrument(skip(self), fields(user_id = %user_id, requested = ?requested))]
    pub async fn session_for(
        &self,
        user_id: UserId,
        requested: Option<BusinessId>,
    ) -> Result<SessionContext, AuthzError> {
        let memberships = self.list_memberships(user_id).await?;
        let business_ids: Vec<BusinessId> = memberships.iter().map(|m| m.business_id).collect();

        let current = match requested {
            Some(business_id) => business_id,
            None => match memberships.iter().find(|m| m.default).or(memberships.first()) {
                Some(m) => {
                    if !m.default {
                        tracing::warn!(
                            user_id = %user_id,
                            business_id = %m.business_id,
                            "user has memberships but no default; using the newest"
                        );
                    }
                    m.business_id
                }
                None => return Ok(SessionContext::without_business(user_id)),
            },
        };

        SessionContext::new(user_id, current, business_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{Fixture, OWNER};
    use crate::store::{NewBusiness, NewMembership};

    #[tokio::test]
    async fn lists_accepted_memberships_newest_first() {
        let fx = Fixture::new().await;
        let second = fx
            .store
            .bootstrap_business(OWNER, NewBusiness::named("Second"))
            .await
            .unwrap();
        let resolver = MembershipResolver::new(fx.store.clone());

        let memberships = resolver.list_memberships(OWNER).await.unwrap();
        assert_eq!(
            memberships,
            vec![
                MembershipSummary { business_id: second.business.id, default: false },
                MembershipSummary { business_id: fx.business(), default: true },
            ]
        );
        assert_eq!(resolver.default_business(OWNER).await.unwrap(), fx.business());
    }

    #[tokio::test]
    async fn pending_invitations_are_not_memberships() {
        let fx = Fixture::new().await;
        let invited = UserId::new(9);
        fx.store
            .insert_membership(NewMembership::invitation(
                invited,
                fx.business(),
                "token".to_string(),
                chrono::Utc::now(),
            ))
            .await
            .unwrap();
        let resolver = MembershipResolver::new(fx.store.clone());

        assert!(resolver.list_memberships(invited).await.unwrap().is_empty());
        assert_eq!(
            resolver.default_business(invited).await,
            Err(AuthzError::NoMembership)
        );
    }

    #[tokio::test]
    async fn user_without_memberships_gets_an_empty_session() {
        let fx = Fixture::new().await;
        let resolver = MembershipResolver::new(fx.store.clone());

        let session = resolver.session_for(UserId::new(42), None).await.unwrap();
        assert_eq!(session.current_business_id(), None);
        assert_eq!(session.require_business(), Err(AuthzError::NoMembership));
    }

    #[tokio::test]
    async fn requested_business_must_be_a_membership() {
        let fx = Fixture::new().await;
        let resolver = MembershipResolver::new(fx.store.clone());

        let session = resolver.session_for(OWNER, None).await.unwrap();
        assert_eq!(session.current_business_id(), Some(fx.business()));

        let other = BusinessId::new(999);
        assert_eq!(
            resolver.session_for(OWNER, Some(other)).await,
            Err(AuthzError::NotAMember(other))
        );
    }
}
