use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use onboard_auth::AuthzError;
use onboard_core::{BusinessId, UserId};

use super::store_failure;
use crate::store::{EntityStore, Membership, NewMembership, StoreError};

/// How long an invitation token stays valid.
pub const INVITATION_TTL_HOURS: i64 = 24;

/// A freshly issued invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invitation {
    pub user_id: UserId,
    pub business_id: BusinessId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Pending-membership lifecycle: issue and redeem invitation tokens.
///
/// Whether the inviter may invite is decided by the caller.
#[derive(Debug, Clone)]
pub struct Invitations<S> {
    store: S,
}

impl<S: EntityStore> Invitations<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Invite `user_id` into `business_id`. An existing pending invitation
    /// gets a fresh token instead of a second row.
    #[instrument(
        skip(self, now),
        fields(business_id = %business_id, invited_by = %invited_by, user_id = %user_id)
    )]
    pub async fn invite(
        &self,
        business_id: BusinessId,
        invited_by: UserId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Invitation, AuthzError> {
        let existing = self
            .store
            .membership(user_id, business_id)
            .await
            .map_err(|e| store_failure("membership", e))?;

        let token = Uuid::new_v4().simple().to_string();
        let expires_at = now + Duration::hours(INVITATION_TTL_HOURS);

        match existing {
            Some(m) if m.accepted => {
                return Err(AuthzError::AlreadyMember {
                    user: user_id,
                    business: business_id,
                });
            }
            Some(_) => {
                self.store
                    .refresh_invitation(user_id, business_id, token.clone(), expires_at)
                    .await
                    .map_err(|e| store_failure("refresh_invitation", e))?;
                tracing::info!("invitation refreshed");
            }
            None => {
                self.store
                    .insert_membership(NewMembership::invitation(
                        user_id,
                        business_id,
                        token.clone(),
                        expires_at,
                    ))
                    .await
                    .map_err(|e| match e {
                        StoreError::ForeignKeyViolation(_) => {
                            AuthzError::NotFound(format!("business {business_id}"))
                        }
                        other => store_failure("insert_membership", other),
                    })?;
                tracing::info!("invitation created");
            }
        }

        Ok(Invitation {
            user_id,
            business_id,
            token,
            expires_at,
        })
    }

    /// Redeem `token` as `user_id`.
    ///
    /// The membership becomes the user's default iff it is their first
    /// accepted one. An already-accepted membership just loses its token.
    #[instrument(skip(self, token, now), fields(user_id = %user_id))]
    pub async fn accept_invitation(
        &self,
        user_id: UserId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Membership, AuthzError> {
        let membership = self
            .store
            .membership_by_token(token)
            .await
            .map_err(|e| store_failure("membership_by_token", e))?
            .filter(|m| m.user_id == user_id)
            .ok_or(AuthzError::InvalidInvitation)?;

        let expired = membership.token_expiry.map_or(true, |expiry| expiry < now);
        if !membership.accepted && expired {
            tracing::warn!(business_id = %membership.business_id, "expired invitation presented");
            return Err(AuthzError::InvalidInvitation);
        }

        let accepted = self
            .store
            .accept_membership(user_id, membership.business_id)
            .await
            .map_err(|e| store_failure("accept_membership", e))?;
        tracing::info!(
            business_id = %accepted.business_id,
            default = accepted.default_option,
            "invitation accepted"
        );
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::{Fixture, OWNER};
    use crate::store::NewBusiness;

    const INVITEE: UserId = UserId::new(20);

    #[tokio::test]
    async fn invitation_token_is_32_hex_chars_valid_for_a_day() {
        let fx = Fixture::new().await;
        let invitations = Invitations::new(fx.store.clone());
        let now = Utc::now();

        let invite = invitations.invite(fx.business(), OWNER, INVITEE, now).await.unwrap();
        assert_eq!(invite.token.len(), 32);
        assert!(invite.token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(invite.expires_at, now + Duration::hours(24));

        let pending = fx.store.membership(INVITEE, fx.business()).await.unwrap().unwrap();
        assert!(!pending.accepted);
    }

    #[tokio::test]
    async fn reinviting_refreshes_the_token() {
        let fx = Fixture::new().await;
        let invitations = Invitations::new(fx.store.clone());

        let first = invitations
            .invite(fx.business(), OWNER, INVITEE, Utc::now())
            .await
            .unwrap();
        let second = invitations
            .invite(fx.business(), OWNER, INVITEE, Utc::now())
            .await
            .unwrap();
        assert_ne!(first.token, second.token);
        assert!(fx.store.membership_by_token(&first.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn members_cannot_be_invited_again() {
        let fx = Fixture::new().await;
        let invitations = Invitations::new(fx.store.clone());
        assert_eq!(
            invitations.invite(fx.business(), OWNER, OWNER, Utc::now()).await,
            Err(AuthzError::AlreadyMember {
                user: OWNER,
                business: fx.business(),
            })
        );
    }

    #[tokio::test]
    async fn first_acceptance_becomes_default() {
        let fx = Fixture::new().await;
        let invitations = Invitations::new(fx.store.clone());
        let now = Utc::now();
        let invite = invitations.invite(fx.business(), OWNER, INVITEE, now).await.unwrap();

        let accepted = invitations
            .accept_invitation(INVITEE, &invite.token, now)
            .await
            .unwrap();
        assert!(accepted.accepted && accepted.default_option);
        assert_eq!(accepted.token, None);
        assert_eq!(accepted.token_expiry, None);
    }

    #[tokio::test]
    async fn later_acceptance_keeps_existing_default() {
        let fx = Fixture::new().await;
        let other = fx
            .store
            .bootstrap_business(INVITEE, NewBusiness::named("Own"))
            .await
            .unwrap();
        let invitations = Invitations::new(fx.store.clone());
        let now = Utc::now();
        let invite = invitations.invite(fx.business(), OWNER, INVITEE, now).await.unwrap();

        let accepted = invitations
            .accept_invitation(INVITEE, &invite.token, now)
            .await
            .unwrap();
        assert!(accepted.accepted && !accepted.default_option);
        let own = fx.store.membership(INVITEE, other.business.id).await.unwrap().unwrap();
        assert!(own.is_default());
    }

    #[tokio::test]
    async fn expired_or_foreign_tokens_are_invalid() {
        let fx = Fixture::new().await;
        let invitations = Invitations::new(fx.store.clone());
        let now = Utc::now();
        let invite = invitations.invite(fx.business(), OWNER, INVITEE, now).await.unwrap();

        assert_eq!(
            invitations
                .accept_invitation(UserId::new(21), &invite.token, now)
                .await,
            Err(AuthzError::InvalidInvitation)
        );
        assert_eq!(
            invitations
                .accept_invitation(INVITEE, &invite.token, now + Duration::hours(25))
                .await,
            Err(AuthzError::InvalidInvitation)
        );
        assert_eq!(
            invitations.accept_invitation(INVITEE, "nope", now).await,
            Err(AuthzError::InvalidInvitation)
        );

        // Expiry is inclusive.
        assert!(invitations
            .accept_invitation(INVITEE, &invite.token, invite.expires_at)
            .await
            .is_ok());
    }
}
