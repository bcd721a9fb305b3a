use serde::{Deserialize, Serialize};

use onboard_core::{BusinessId, UserId};

use crate::AuthzError;

/// Per-request tenant context.
///
/// Built from the authenticated user and their accepted memberships. A
/// session is never mutated in place: switching business yields a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SessionParts")]
pub struct SessionContext {
    pub user_id: UserId,
    current_business_id: Option<BusinessId>,
    business_ids: Vec<BusinessId>,
}

/// Wire shape of a session, checked before it becomes a `SessionContext`.
#[derive(Deserialize)]
struct SessionParts {
    user_id: UserId,
    current_business_id: Option<BusinessId>,
    #[serde(default)]
    business_ids: Vec<BusinessId>,
}

impl TryFrom<SessionParts> for SessionContext {
    type Error = AuthzError;

    fn try_from(parts: SessionParts) -> Result<Self, Self::Error> {
        match parts.current_business_id {
            Some(current) => SessionContext::new(parts.user_id, current, parts.business_ids),
            None if parts.business_ids.is_empty() => {
                Ok(SessionContext::without_business(parts.user_id))
            }
            None => Err(AuthzError::Invalid(
                "session lists businesses but has no current business".to_string(),
            )),
        }
    }
}

impl SessionContext {
    /// Context for a user with no accepted memberships.
    pub fn without_business(user_id: UserId) -> Self {
        Self {
            user_id,
            current_business_id: None,
            business_ids: Vec::new(),
        }
    }

    /// Context scoped to `current`, which must appear in `business_ids`.
    pub fn new(
        user_id: UserId,
        current: BusinessId,
        business_ids: Vec<BusinessId>,
    ) -> Result<Self, AuthzError> {
        if !business_ids.contains(&current) {
            return Err(AuthzError::NotAMember(current));
        }
        Ok(Self {
            user_id,
            current_business_id: Some(current),
            business_ids,
        })
    }

    pub fn current_business_id(&self) -> Option<BusinessId> {
        self.current_business_id
    }

    /// The business every tenant-scoped query must filter by.
    pub fn require_business(&self) -> Result<BusinessId, AuthzError> {
        self.current_business_id.ok_or(AuthzError::NoMembership)
    }

    /// Businesses the user is an accepted member of, most recent first.
    pub fn business_ids(&self) -> &[BusinessId] {
        &self.business_ids
    }

    pub fn is_member_of(&self, business_id: BusinessId) -> bool {
        self.business_ids.contains(&business_id)
    }

    /// Switch the working business.
    ///
    /// Selecting the current business returns an identical context.
    pub fn with_current(&self, business_id: BusinessId) -> Result<Self, AuthzError> {
        if !self.is_member_of(business_id) {
            return Err(AuthzError::NotAMember(business_id));
        }
        Ok(Self {
            current_business_id: Some(business_id),
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[i64]) -> Vec<BusinessId> {
        raw.iter().copied().map(BusinessId::new).collect()
    }

    #[test]
    fn switching_to_a_member_business_keeps_the_rest() {
        let session = SessionContext::new(UserId::new(1), BusinessId::new(10), ids(&[10, 20])).unwrap();
        let switched = session.with_current(BusinessId::new(20)).unwrap();

        assert_eq!(switched.current_business_id(), Some(BusinessId::new(20)));
        assert_eq!(switched.business_ids(), session.business_ids());
        assert_eq!(session.current_business_id(), Some(BusinessId::new(10)));
    }

    #[test]
    fn switching_to_the_current_business_is_a_no_op() {
        let session = SessionContext::new(UserId::new(1), BusinessId::new(10), ids(&[10])).unwrap();
        assert_eq!(session.with_current(BusinessId::new(10)).unwrap(), session);
    }

    #[test]
    fn switching_outside_memberships_is_rejected() {
        let session = SessionContext::new(UserId::new(1), BusinessId::new(10), ids(&[10])).unwrap();
        assert_eq!(
            session.with_current(BusinessId::new(99)),
            Err(AuthzError::NotAMember(BusinessId::new(99)))
        );
    }

    #[test]
    fn deserializing_enforces_membership_of_the_current_business() {
        let session: SessionContext = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "current_business_id": 10,
            "business_ids": [10, 20],
        }))
        .unwrap();
        assert_eq!(session.current_business_id(), Some(BusinessId::new(10)));

        let outsider = serde_json::from_value::<SessionContext>(serde_json::json!({
            "user_id": 1,
            "current_business_id": 99,
            "business_ids": [10],
        }));
        assert!(outsider.is_err());

        let dangling = serde_json::from_value::<SessionContext>(serde_json::json!({
            "user_id": 1,
            "current_business_id": null,
            "business_ids": [10],
        }));
        assert!(dangling.is_err());
    }

    #[test]
    fn serialized_sessions_read_back_unchanged() {
        let session = SessionContext::new(UserId::new(3), BusinessId::new(20), ids(&[20, 10])).unwrap();
        let json = serde_json::to_string(&session).unwrap();
        assert_eq!(serde_json::from_str::<SessionContext>(&json).unwrap(), session);

        let lone = SessionContext::without_business(UserId::new(4));
        let json = serde_json::to_string(&lone).unwrap();
        assert_eq!(serde_json::from_str::<SessionContext>(&json).unwrap(), lone);
    }

    #[test]
    fn no_business_means_no_membership() {
        let session = SessionContext::without_business(UserId::new(4));
        assert_eq!(session.require_business(), Err(AuthzError::NoMembership));
        assert_eq!(
            session.with_current(BusinessId::new(1)),
            Err(AuthzError::NotAMember(BusinessId::new(1)))
        );
    }
}
