use tracing::instrument;

use onboard_auth::AuthzError;
use onboard_core::{BusinessId, RoleId, UserId, UserRoleId};

use super::hierarchy::DepartmentHierarchy;
use super::store_failure;
use crate::store::{EntityStore, NewUserRole, StoreError};

/// Maintains role assignments and the one-primary-per-business marker.
///
/// The first role a user gets in a business is primary. Concurrent first
/// assignments are settled by the store's uniqueness rule: the loser is
/// re-inserted as non-primary.
#[derive(Debug, Clone)]
pub struct PrimaryRoleTracker<S> {
    store: S,
    hierarchy: DepartmentHierarchy<S>,
}

impl<S: EntityStore + Clone> PrimaryRoleTracker<S> {
    pub fn new(store: S) -> Self {
        Self {
            hierarchy: DepartmentHierarchy::new(store.clone()),
            store,
        }
    }

    /// Assign `role_id` to `user_id` on behalf of `acting_user_id`, scoped to
    /// `business_id`. Assigning a role the user already holds returns the
    /// existing assignment.
    #[instrument(
        skip(self),
        fields(
            business_id = %business_id,
            acting_user_id = %acting_user_id,
            user_id = %user_id,
            role_id = %role_id
        )
    )]
    pub async fn assign(
        &self,
        business_id: BusinessId,
        acting_user_id: UserId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<UserRoleId, AuthzError> {
        if self
            .hierarchy
            .role_in_business(business_id, role_id)
            .await?
            .is_none()
        {
            tracing::warn!("role does not belong to the acting business");
            return Err(AuthzError::RoleNotInBusiness {
                role: role_id,
                business: business_id,
            });
        }

        let membership = self
            .store
            .membership(user_id, business_id)
            .await
            .map_err(|e| store_failure("membership", e))?;
        if !membership.is_some_and(|m| m.accepted) {
            tracing::warn!("assignment target is not a member");
            return Err(AuthzError::UserNotMember {
                user: user_id,
                business: business_id,
            });
        }

        let held = self.held_roles(user_id, business_id).await?;
        if let Some(existing) = held.iter().find(|ur| ur.role_id == role_id) {
            return Ok(existing.id);
        }

        let is_primary = held.is_empty();
        let attempt = NewUserRole {
            user_id,
            role_id,
            primary_role_for_user: is_primary,
            updated_by_user_id: Some(acting_user_id),
        };

        let inserted = match self.store.insert_user_role(attempt.clone()).await {
            Ok(row) => row,
            Err(StoreError::UniqueViolation(detail)) if is_primary => {
                tracing::info!(%detail, "primary taken concurrently; assigning as secondary");
                let retry = NewUserRole {
                    primary_role_for_user: false,
                    ..attempt
                };
                match self.store.insert_user_role(retry).await {
                    Ok(row) => row,
                    Err(StoreError::UniqueViolation(_)) => {
                        return self.concurrently_assigned(user_id, business_id, role_id).await;
                    }
                    Err(e) => return Err(store_failure("insert_user_role", e)),
                }
            }
            Err(StoreError::UniqueViolation(_)) => {
                return self.concurrently_assigned(user_id, business_id, role_id).await;
            }
            Err(StoreError::NotFound(_)) => {
                return Err(AuthzError::RoleNotInBusiness {
                    role: role_id,
                    business: business_id,
                });
            }
            Err(e) => return Err(store_failure("insert_user_role", e)),
        };

        tracing::info!(
            user_role_id = %inserted.id,
            primary = inserted.primary_role_for_user,
            "role assigned"
        );
        Ok(inserted.id)
    }

    /// Remove an assignment. No remaining role is promoted to primary.
    #[instrument(skip(self), fields(business_id = %business_id, user_id = %user_id, role_id = %role_id))]
    pub async fn remove(
        &self,
        business_id: BusinessId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), AuthzError> {
        if self
            .hierarchy
            .role_in_business(business_id, role_id)
            .await?
            .is_none()
        {
            return Err(AuthzError::RoleNotInBusiness {
                role: role_id,
                business: business_id,
            });
        }

        let removed = self
            .store
            .delete_user_role(user_id, role_id)
            .await
            .map_err(|e| store_failure("delete_user_role", e))?;
        if removed {
            tracing::info!("role unassigned");
        } else {
            tracing::debug!("no assignment to remove");
        }
        Ok(())
    }

    async fn held_roles(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<crate::store::UserRole>, AuthzError> {
        self.store
            .user_roles_in_business(user_id, business_id)
            .await
            .map_err(|e| store_failure("user_roles_in_business", e))
    }

    /// The same role was assigned by another request in the meantime.
    async fn concurrently_assigned(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        role_id: RoleId,
    ) -> Result<UserRoleId, AuthzError> {
        self.held_roles(user_id, business_id)
            .await?
            .into_iter()
            .find(|ur| ur.role_id == role_id)
            .map(|ur| ur.id)
            .ok_or_else(|| {
                store_failure(
                    "insert_user_role",
                    StoreError::UniqueViolation(format!(
                        "user {user_id} role {role_id} conflicted but is not assigned"
                    )),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use proptest::prelude::*;

    use onboard_auth::AccessTier;

    use super::*;
    use crate::access::fixtures::{FaultyStore, Fixture, OWNER};
    use crate::store::{NewBusiness, NewDepartment, NewMembership};

    #[tokio::test]
    async fn first_role_is_primary_second_is_not() {
        let fx = Fixture::new().await;
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let lead = fx.role(sales, "Lead", AccessTier::Manager, &[]).await;
        let user = fx.member(UserId::new(2)).await;
        let tracker = PrimaryRoleTracker::new(fx.store.clone());

        tracker.assign(fx.business(), OWNER, user, clerk).await.unwrap();
        tracker.assign(fx.business(), OWNER, user, lead).await.unwrap();

        let held = fx.store.user_roles_in_business(user, fx.business()).await.unwrap();
        let primary: Vec<_> = held.iter().filter(|ur| ur.primary_role_for_user).collect();
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].role_id, clerk);
        assert!(held.iter().all(|ur| ur.updated_by_user_id == Some(OWNER)));
    }

    #[tokio::test]
    async fn role_from_another_business_is_rejected() {
        let fx = Fixture::new().await;
        let other = fx
            .store
            .bootstrap_business(UserId::new(8), NewBusiness::named("Elsewhere"))
            .await
            .unwrap();
        let user = fx.member(UserId::new(2)).await;
        let tracker = PrimaryRoleTracker::new(fx.store.clone());

        assert_eq!(
            tracker
                .assign(fx.business(), OWNER, user, other.general_role.id)
                .await,
            Err(AuthzError::RoleNotInBusiness {
                role: other.general_role.id,
                business: fx.business(),
            })
        );
    }

    #[tokio::test]
    async fn non_members_cannot_be_assigned() {
        let fx = Fixture::new().await;
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let tracker = PrimaryRoleTracker::new(fx.store.clone());
        let outsider = UserId::new(66);

        assert_eq!(
            tracker.assign(fx.business(), OWNER, outsider, clerk).await,
            Err(AuthzError::UserNotMember {
                user: outsider,
                business: fx.business(),
            })
        );
    }

    #[tokio::test]
    async fn reassigning_a_held_role_is_idempotent() {
        let fx = Fixture::new().await;
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let user = fx.member(UserId::new(2)).await;
        let tracker = PrimaryRoleTracker::new(fx.store.clone());

        let first = tracker.assign(fx.business(), OWNER, user, clerk).await.unwrap();
        let again = tracker.assign(fx.business(), OWNER, user, clerk).await.unwrap();
        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn lost_primary_race_falls_back_to_secondary() {
        let fx = Fixture::new().await;
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let lead = fx.role(sales, "Lead", AccessTier::Manager, &[]).await;
        let user = fx.member(UserId::new(2)).await;
        fx.grant(user, clerk, true).await;

        // The tracker now believes the user holds nothing and tries primary.
        let store = FaultyStore::new(fx.store.clone());
        store.faults.hide_user_roles.store(true, Ordering::SeqCst);
        let tracker = PrimaryRoleTracker::new(store);

        tracker.assign(fx.business(), OWNER, user, lead).await.unwrap();

        let held = fx.store.user_roles_in_business(user, fx.business()).await.unwrap();
        assert_eq!(held.len(), 2);
        assert_eq!(held.iter().filter(|ur| ur.primary_role_for_user).count(), 1);
        assert!(held
            .iter()
            .any(|ur| ur.role_id == lead && !ur.primary_role_for_user));
    }

    #[tokio::test]
    async fn removing_the_primary_promotes_nothing() {
        let fx = Fixture::new().await;
        let sales = fx.department("Sales").await;
        let clerk = fx.role(sales, "Clerk", AccessTier::User, &[]).await;
        let lead = fx.role(sales, "Lead", AccessTier::Manager, &[]).await;
        let user = fx.member(UserId::new(2)).await;
        let tracker = PrimaryRoleTracker::new(fx.store.clone());

        tracker.assign(fx.business(), OWNER, user, clerk).await.unwrap();
        tracker.assign(fx.business(), OWNER, user, lead).await.unwrap();
        tracker.remove(fx.business(), user, clerk).await.unwrap();

        let held = fx.store.user_roles_in_business(user, fx.business()).await.unwrap();
        assert_eq!(held.len(), 1);
        assert!(!held[0].primary_role_for_user);

        // Removing again is a no-op.
        tracker.remove(fx.business(), user, clerk).await.unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Assign { user: usize, role: usize },
        Remove { user: usize, role: usize },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..2, 0usize..4).prop_map(|(user, role)| Op::Assign { user, role }),
            (0usize..2, 0usize..4).prop_map(|(user, role)| Op::Remove { user, role }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: whatever the sequence of assignments and removals, no
        /// (user, business) pair ever has two primary roles, and a user's
        /// first role in a business is always primary.
        #[test]
        fn at_most_one_primary_per_user_and_business(ops in prop::collection::vec(op(), 1..30)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let outcome: Result<(), TestCaseError> = rt.block_on(async {
                let fx = Fixture::new().await;
                let second = fx
                    .store
                    .bootstrap_business(OWNER, NewBusiness::named("Second"))
                    .await
                    .unwrap();
                let businesses = [fx.business(), second.business.id];

                let sales = fx.department("Sales").await;
                let support = fx
                    .store
                    .insert_department(NewDepartment {
                        business_id: second.business.id,
                        name: "Support".to_string(),
                    })
                    .await
                    .unwrap()
                    .id;
                let roles = [
                    (fx.business(), fx.role(sales, "Clerk", AccessTier::User, &[]).await),
                    (fx.business(), fx.role(sales, "Lead", AccessTier::Manager, &[]).await),
                    (second.business.id, fx.role(support, "Agent", AccessTier::User, &[]).await),
                    (second.business.id, fx.role(support, "Chief", AccessTier::Manager, &[]).await),
                ];

                let users = [UserId::new(10), UserId::new(11)];
                for user in users {
                    fx.member(user).await;
                    fx.store
                        .insert_membership(NewMembership {
                            user_id: user,
                            business_id: second.business.id,
                            accepted: true,
                            default_option: false,
                            token: None,
                            token_expiry: None,
                        })
                        .await
                        .unwrap();
                }

                let tracker = PrimaryRoleTracker::new(fx.store.clone());
                for op in ops {
                    match op {
                        Op::Assign { user, role } => {
                            let (business, role_id) = roles[role];
                            let before = fx
                                .store
                                .user_roles_in_business(users[user], business)
                                .await
                                .unwrap();
                            let id = tracker.assign(business, OWNER, users[user], role_id).await.unwrap();
                            if before.is_empty() {
                                let after = fx
                                    .store
                                    .user_roles_in_business(users[user], business)
                                    .await
                                    .unwrap();
                                let row = after.iter().find(|ur| ur.id == id).unwrap();
                                prop_assert!(row.primary_role_for_user);
                            }
                        }
                        Op::Remove { user, role } => {
                            let (business, role_id) = roles[role];
                            tracker.remove(business, users[user], role_id).await.unwrap();
                        }
                    }

                    for user in users {
                        for business in businesses {
                            let primaries = fx
                                .store
                                .user_roles_in_business(user, business)
                                .await
                                .unwrap()
                                .into_iter()
                                .filter(|ur| ur.primary_role_for_user)
                                .count();
                            prop_assert!(primaries <= 1);
                        }
                    }
                }
                Ok(())
            });
            outcome?;
        }
    }
}
