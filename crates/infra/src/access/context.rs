use tracing::instrument;

use onboard_auth::{AuthzError, SessionContext};
use onboard_core::{BusinessId, UserId};

use super::store_failure;
use crate::store::{EntityStore, StoreError};

/// Changes which business a user works in.
///
/// `set_current` only derives a new session value; `set_default` persists
/// the user's default business.
#[derive(Debug, Clone)]
pub struct BusinessContextSwitcher<S> {
    store: S,
}

impl<S: EntityStore> BusinessContextSwitcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Session scoped to `business_id`. No store access; membership is
    /// checked against the session's cached business list.
    pub fn set_current(
        &self,
        session: &SessionContext,
        business_id: BusinessId,
    ) -> Result<SessionContext, AuthzError> {
        if session.current_business_id() == Some(business_id) {
            return Ok(session.clone());
        }
        session.with_current(business_id).inspect_err(|_| {
            tracing::warn!(
                user_id = %session.user_id,
                business_id = %business_id,
                "switch to a business outside the user's memberships"
            );
        })
    }

    /// Make `business_id` the user's default business.
    ///
    /// The old default is cleared and the new one set in one transaction;
    /// on failure the old default stays in place.
    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id))]
    pub async fn set_default(&self, user_id: UserId, business_id: BusinessId) -> Result<(), AuthzError> {
        let memberships = self
            .store
            .memberships_for_user(user_id)
            .await
            .map_err(|e| store_failure("memberships_for_user", e))?;

        if !memberships
            .iter()
            .any(|m| m.accepted && m.business_id == business_id)
        {
            tracing::warn!("default requested for a business the user is not a member of");
            return Err(AuthzError::NotAMember(business_id));
        }

        let Some(current) = memberships.iter().find(|m| m.is_default()) else {
            tracing::error!("member has no default membership");
            return Err(AuthzError::NoDefaultSet(user_id));
        };
        if current.business_id == business_id {
            return Ok(());
        }

        match self
            .store
            .flip_default_membership(user_id, current.business_id, business_id)
            .await
        {
            Ok(()) => {
                tracing::info!(previous = %current.business_id, "default business changed");
                Ok(())
            }
            // The default moved under us; nothing was written.
            Err(StoreError::NotFound(detail)) => {
                tracing::error!(%detail, "default membership changed during flip");
                Err(AuthzError::NoDefaultSet(user_id))
            }
            Err(e) => Err(store_failure("flip_default_membership", e)),
        }
    }
}
