use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use onboard_auth::{AccessTier, Grant, PermissionFlags};
use onboard_core::{BusinessId, DepartmentId, RoleId, UserId};

use crate::store::{
    BootstrappedBusiness, Business, Department, EntityStore, InMemoryEntityStore, Membership,
    NewBusiness, NewDepartment, NewMembership, NewRole, NewUserRole, Role, RoleGrant,
    StoreError, UserRole,
};

pub(crate) const OWNER: UserId = UserId::new(1);

/// One bootstrapped business on a fresh in-memory store.
pub(crate) struct Fixture {
    pub store: Arc<InMemoryEntityStore>,
    pub boot: BootstrappedBusiness,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryEntityStore::new());
        let boot = store
            .bootstrap_business(OWNER, NewBusiness::named("Acme"))
            .await
            .unwrap();
        Self { store, boot }
    }

    pub fn business(&self) -> BusinessId {
        self.boot.business.id
    }

    pub async fn department(&self, name: &str) -> DepartmentId {
        self.store
            .insert_department(NewDepartment {
                business_id: self.business(),
                name: name.to_string(),
            })
            .await
            .unwrap()
            .id
    }

    pub async fn role(
        &self,
        department_id: DepartmentId,
        name: &str,
        access: AccessTier,
        grants: &[Grant],
    ) -> RoleId {
        self.store
            .insert_role(NewRole {
                department_id,
                name: name.to_string(),
                access,
                permissions: PermissionFlags::from_grants(grants.iter().copied()),
            })
            .await
            .unwrap()
            .id
    }

    /// Accepted member of the fixture business without any role.
    pub async fn member(&self, user_id: UserId) -> UserId {
        let has_default = self
            .store
            .memberships_for_user(user_id)
            .await
            .unwrap()
            .iter()
            .any(|m| m.is_default());
        self.store
            .insert_membership(NewMembership {
                user_id,
                business_id: self.business(),
                accepted: true,
                default_option: !has_default,
                token: None,
                token_expiry: None,
            })
            .await
            .unwrap();
        user_id
    }

    /// Write an assignment directly, bypassing the tracker.
    pub async fn grant(&self, user_id: UserId, role_id: RoleId, primary: bool) {
        self.store
            .insert_user_role(NewUserRole {
                user_id,
                role_id,
                primary_role_for_user: primary,
                updated_by_user_id: Some(OWNER),
            })
            .await
            .unwrap();
    }
}

/// Switches for [`FaultyStore`].
#[derive(Debug, Default)]
pub(crate) struct Faults {
    /// `departments_named` returns every row twice.
    pub duplicate_admin: AtomicBool,
    /// `user_roles_in_business` reports nothing, as a concurrent request
    /// that has not yet seen the other assignment would.
    pub hide_user_roles: AtomicBool,
    /// `role_grants_for_user` fails with a database error.
    pub fail_grants: AtomicBool,
}

/// In-memory store with injectable misbehaviour.
#[derive(Debug, Clone)]
pub(crate) struct FaultyStore {
    inner: Arc<InMemoryEntityStore>,
    pub faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryEntityStore>) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }
}

#[async_trait]
impl EntityStore for FaultyStore {
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        self.inner.memberships_for_user(user_id).await
    }

    async fn membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Option<Membership>, StoreError> {
        self.inner.membership(user_id, business_id).await
    }

    async fn membership_by_token(&self, token: &str) -> Result<Option<Membership>, StoreError> {
        self.inner.membership_by_token(token).await
    }

    async fn insert_membership(&self, membership: NewMembership) -> Result<Membership, StoreError> {
        self.inner.insert_membership(membership).await
    }

    async fn refresh_invitation(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        token: String,
        expiry: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        self.inner
            .refresh_invitation(user_id, business_id, token, expiry)
            .await
    }

    async fn accept_membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Membership, StoreError> {
        self.inner.accept_membership(user_id, business_id).await
    }

    async fn flip_default_membership(
        &self,
        user_id: UserId,
        from: BusinessId,
        to: BusinessId,
    ) -> Result<(), StoreError> {
        self.inner.flip_default_membership(user_id, from, to).await
    }

    async fn bootstrap_business(
        &self,
        registrant: UserId,
        business: NewBusiness,
    ) -> Result<BootstrappedBusiness, StoreError> {
        self.inner.bootstrap_business(registrant, business).await
    }

    async fn business(&self, business_id: BusinessId) -> Result<Option<Business>, StoreError> {
        self.inner.business(business_id).await
    }

    async fn department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        self.inner.department(department_id).await
    }

    async fn departments_named(
        &self,
        business_id: BusinessId,
        name: &str,
    ) -> Result<Vec<Department>, StoreError> {
        let mut rows = self.inner.departments_named(business_id, name).await?;
        if self.faults.duplicate_admin.load(Ordering::SeqCst) {
            rows.extend(rows.clone());
        }
        Ok(rows)
    }

    async fn insert_department(&self, department: NewDepartment) -> Result<Department, StoreError> {
        self.inner.insert_department(department).await
    }

    async fn delete_department(&self, department_id: DepartmentId) -> Result<(), StoreError> {
        self.inner.delete_department(department_id).await
    }

    async fn role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        self.inner.role(role_id).await
    }

    async fn roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Vec<Role>, StoreError> {
        self.inner.roles_in_department(department_id).await
    }

    async fn insert_role(&self, role: NewRole) -> Result<Role, StoreError> {
        self.inner.insert_role(role).await
    }

    async fn delete_role(&self, role_id: RoleId) -> Result<(), StoreError> {
        self.inner.delete_role(role_id).await
    }

    async fn role_grants_for_user(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<RoleGrant>, StoreError> {
        if self.faults.fail_grants.load(Ordering::SeqCst) {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        self.inner.role_grants_for_user(user_id, business_id).await
    }

    async fn user_in_department(
        &self,
        user_id: UserId,
        department_id: DepartmentId,
    ) -> Result<bool, StoreError> {
        self.inner.user_in_department(user_id, department_id).await
    }

    async fn user_roles_in_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<UserRole>, StoreError> {
        if self.faults.hide_user_roles.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        self.inner.user_roles_in_business(user_id, business_id).await
    }

    async fn insert_user_role(&self, user_role: NewUserRole) -> Result<UserRole, StoreError> {
        self.inner.insert_user_role(user_role).await
    }

    async fn delete_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool, StoreError> {
        self.inner.delete_user_role(user_id, role_id).await
    }

    async fn count_user_roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<u64, StoreError> {
        self.inner.count_user_roles_in_department(department_id).await
    }

    async fn count_user_roles_for_role(&self, role_id: RoleId) -> Result<u64, StoreError> {
        self.inner.count_user_roles_for_role(role_id).await
    }
}
