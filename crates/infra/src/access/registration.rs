use serde::Serialize;
use tracing::instrument;

use onboard_auth::{AuthzError, SessionContext};
use onboard_core::UserId;

use super::membership::MembershipResolver;
use super::store_failure;
use crate::store::{Business, EntityStore, NewBusiness};

/// Result of a business registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Registered {
    pub business: Business,
    pub session: SessionContext,
}

/// Creates new tenants.
#[derive(Debug, Clone)]
pub struct BusinessRegistration<S> {
    store: S,
    memberships: MembershipResolver<S>,
}

impl<S: EntityStore + Clone> BusinessRegistration<S> {
    pub fn new(store: S) -> Self {
        Self {
            memberships: MembershipResolver::new(store.clone()),
            store,
        }
    }

    /// Create a business with its locked Admin department and General role.
    ///
    /// The registrant becomes an admin member holding General as primary
    /// role, and gets a session scoped to the new business.
    #[instrument(skip(self, business), fields(registrant = %registrant, name = %business.name))]
    pub async fn register_business(
        &self,
        registrant: UserId,
        business: NewBusiness,
    ) -> Result<Registered, AuthzError> {
        business.validate()?;

        let boot = self
            .store
            .bootstrap_business(registrant, business)
            .await
            .map_err(|e| store_failure("bootstrap_business", e))?;
        tracing::info!(business_id = %boot.business.id, "business registered");

        let session = self
            .memberships
            .session_for(registrant, Some(boot.business.id))
            .await?;
        Ok(Registered {
            business: boot.business,
            session,
        })
    }
}
