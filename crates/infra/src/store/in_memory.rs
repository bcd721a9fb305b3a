use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use onboard_auth::{AccessTier, PermissionFlags};
use onboard_core::{BusinessId, DepartmentId, PermissionId, RoleId, UserId, UserRoleId};

use super::records::{
    BootstrappedBusiness, Business, Department, Membership, NewBusiness, NewDepartment,
    NewMembership, NewRole, NewUserRole, Role, RoleGrant, UserRole, ADMIN_DEPARTMENT,
    GENERAL_ROLE,
};
use super::r#trait::{EntityStore, StoreError};

#[derive(Debug, Clone, Default)]
struct Tables {
    next_id: i64,
    next_seq: u64,
    businesses: BTreeMap<BusinessId, Business>,
    /// Insertion sequence kept alongside each row for newest-first ordering.
    memberships: BTreeMap<(UserId, BusinessId), (u64, Membership)>,
    departments: BTreeMap<DepartmentId, Department>,
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, PermissionFlags>,
    user_roles: BTreeMap<UserRoleId, UserRole>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn has_default(&self, user_id: UserId) -> bool {
        self.memberships
            .values()
            .any(|(_, m)| m.user_id == user_id && m.is_default())
    }

    fn business_of_department(&self, department_id: DepartmentId) -> Option<BusinessId> {
        self.departments.get(&department_id).map(|d| d.business_id)
    }

    fn insert_membership(&mut self, new: NewMembership) -> Result<Membership, StoreError> {
        if !self.businesses.contains_key(&new.business_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "business {} does not exist",
                new.business_id
            )));
        }
        let key = (new.user_id, new.business_id);
        if self.memberships.contains_key(&key) {
            return Err(StoreError::UniqueViolation(format!(
                "membership ({}, {})",
                new.user_id, new.business_id
            )));
        }
        if new.accepted && new.default_option && self.has_default(new.user_id) {
            return Err(StoreError::UniqueViolation(format!(
                "default membership for user {}",
                new.user_id
            )));
        }

        let membership = Membership {
            user_id: new.user_id,
            business_id: new.business_id,
            accepted: new.accepted,
            default_option: new.default_option,
            token: new.token,
            token_expiry: new.token_expiry,
            created_on: Utc::now(),
        };
        self.next_seq += 1;
        self.memberships
            .insert(key, (self.next_seq, membership.clone()));
        Ok(membership)
    }

    fn insert_department(
        &mut self,
        new: NewDepartment,
        locked: bool,
    ) -> Result<Department, StoreError> {
        if !self.businesses.contains_key(&new.business_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "business {} does not exist",
                new.business_id
            )));
        }
        if new.name == ADMIN_DEPARTMENT
            && self
                .departments
                .values()
                .any(|d| d.business_id == new.business_id && d.is_admin())
        {
            return Err(StoreError::UniqueViolation(format!(
                "admin department for business {}",
                new.business_id
            )));
        }

        let department = Department {
            id: DepartmentId::new(self.next_id()),
            business_id: new.business_id,
            name: new.name,
            prevent_edit: locked,
            prevent_delete: locked,
        };
        self.departments.insert(department.id, department.clone());
        Ok(department)
    }

    fn insert_role(&mut self, new: NewRole, locked: bool) -> Result<Role, StoreError> {
        if !self.departments.contains_key(&new.department_id) {
            return Err(StoreError::ForeignKeyViolation(format!(
                "department {} does not exist",
                new.department_id
            )));
        }
        let permission_id = PermissionId::new(self.next_id());
        self.permissions.insert(permission_id, new.permissions);

        let role = Role {
            id: RoleId::new(self.next_id()),
            department_id: new.department_id,
            name: new.name,
            access: new.access,
            permission_id,
            prevent_edit: locked,
            prevent_delete: locked,
        };
        self.roles.insert(role.id, role.clone());
        Ok(role)
    }

    fn insert_user_role(&mut self, new: NewUserRole) -> Result<UserRole, StoreError> {
        let business_id = self
            .roles
            .get(&new.role_id)
            .and_then(|r| self.business_of_department(r.department_id))
            .ok_or_else(|| StoreError::NotFound(format!("role {}", new.role_id)))?;

        if self
            .user_roles
            .values()
            .any(|ur| ur.user_id == new.user_id && ur.role_id == new.role_id)
        {
            return Err(StoreError::UniqueViolation(format!(
                "user {} already holds role {}",
                new.user_id, new.role_id
            )));
        }
        if new.primary_role_for_user
            && self.user_roles.values().any(|ur| {
                ur.user_id == new.user_id
                    && ur.business_id == business_id
                    && ur.primary_role_for_user
            })
        {
            return Err(StoreError::UniqueViolation(format!(
                "primary role for user {} in business {}",
                new.user_id, business_id
            )));
        }

        let user_role = UserRole {
            id: UserRoleId::new(self.next_id()),
            user_id: new.user_id,
            role_id: new.role_id,
            business_id,
            primary_role_for_user: new.primary_role_for_user,
            updated_by_user_id: new.updated_by_user_id,
        };
        self.user_roles.insert(user_role.id, user_role.clone());
        Ok(user_role)
    }

    fn role_assignments(&self, role_id: RoleId) -> usize {
        self.user_roles
            .values()
            .filter(|ur| ur.role_id == role_id)
            .count()
    }

    /// Drop a role and its permission. Callers check for assignments first.
    fn remove_role(&mut self, role_id: RoleId) {
        if let Some(role) = self.roles.remove(&role_id) {
            self.permissions.remove(&role.permission_id);
        }
    }
}

/// In-memory entity store.
///
/// Intended for tests/dev. Every operation runs under one lock, so
/// multi-row writes are atomic and the uniqueness rules of the Postgres
/// schema are checked before anything is written.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    tables: RwLock<Tables>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Database("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        let tables = self.read()?;
        let mut rows: Vec<&(u64, Membership)> = tables
            .memberships
            .values()
            .filter(|(_, m)| m.user_id == user_id)
            .collect();
        rows.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(rows.into_iter().map(|(_, m)| m.clone()).collect())
    }

    async fn membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Option<Membership>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .memberships
            .get(&(user_id, business_id))
            .map(|(_, m)| m.clone()))
    }

    async fn membership_by_token(&self, token: &str) -> Result<Option<Membership>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .memberships
            .values()
            .find(|(_, m)| m.token.as_deref() == Some(token))
            .map(|(_, m)| m.clone()))
    }

    async fn insert_membership(&self, membership: NewMembership) -> Result<Membership, StoreError> {
        self.write()?.insert_membership(membership)
    }

    async fn refresh_invitation(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        token: String,
        expiry: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        let mut tables = self.write()?;
        match tables.memberships.get_mut(&(user_id, business_id)) {
            Some((_, m)) if !m.accepted => {
                m.token = Some(token);
                m.token_expiry = Some(expiry);
                Ok(m.clone())
            }
            _ => Err(StoreError::NotFound(format!(
                "pending membership ({user_id}, {business_id})"
            ))),
        }
    }

    async fn accept_membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Membership, StoreError> {
        let mut tables = self.write()?;
        let becomes_default = !tables.has_default(user_id);
        let (_, m) = tables
            .memberships
            .get_mut(&(user_id, business_id))
            .ok_or_else(|| {
                StoreError::NotFound(format!("membership ({user_id}, {business_id})"))
            })?;
        if !m.accepted {
            m.accepted = true;
            m.default_option = becomes_default;
        }
        m.token = None;
        m.token_expiry = None;
        Ok(m.clone())
    }

    async fn flip_default_membership(
        &self,
        user_id: UserId,
        from: BusinessId,
        to: BusinessId,
    ) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        let from_ok = tables
            .memberships
            .get(&(user_id, from))
            .is_some_and(|(_, m)| m.is_default());
        if !from_ok {
            return Err(StoreError::NotFound(format!(
                "default membership ({user_id}, {from})"
            )));
        }
        let to_ok = tables
            .memberships
            .get(&(user_id, to))
            .is_some_and(|(_, m)| m.accepted);
        if !to_ok {
            return Err(StoreError::NotFound(format!(
                "accepted membership ({user_id}, {to})"
            )));
        }

        if let Some((_, m)) = tables.memberships.get_mut(&(user_id, from)) {
            m.default_option = false;
        }
        if let Some((_, m)) = tables.memberships.get_mut(&(user_id, to)) {
            m.default_option = true;
        }
        Ok(())
    }

    async fn bootstrap_business(
        &self,
        registrant: UserId,
        business: NewBusiness,
    ) -> Result<BootstrappedBusiness, StoreError> {
        let mut guard = self.write()?;
        // Staged on a copy so a failure part-way leaves nothing behind.
        let mut tables = guard.clone();

        let business = Business {
            id: BusinessId::new(tables.next_id()),
            name: business.name,
            address: business.address,
            city: business.city,
            province: business.province,
            postal_code: business.postal_code,
        };
        tables.businesses.insert(business.id, business.clone());

        let admin_department = tables.insert_department(
            NewDepartment {
                business_id: business.id,
                name: ADMIN_DEPARTMENT.to_string(),
            },
            true,
        )?;
        let general_role = tables.insert_role(
            NewRole {
                department_id: admin_department.id,
                name: GENERAL_ROLE.to_string(),
                access: AccessTier::Admin,
                permissions: PermissionFlags::all(),
            },
            true,
        )?;

        let default_option = !tables.has_default(registrant);
        let membership = tables.insert_membership(NewMembership {
            user_id: registrant,
            business_id: business.id,
            accepted: true,
            default_option,
            token: None,
            token_expiry: None,
        })?;
        let user_role = tables.insert_user_role(NewUserRole {
            user_id: registrant,
            role_id: general_role.id,
            primary_role_for_user: true,
            updated_by_user_id: Some(registrant),
        })?;
        *guard = tables;

        Ok(BootstrappedBusiness {
            business,
            admin_department,
            general_role,
            membership,
            user_role,
        })
    }

    async fn business(&self, business_id: BusinessId) -> Result<Option<Business>, StoreError> {
        Ok(self.read()?.businesses.get(&business_id).cloned())
    }

    async fn department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        Ok(self.read()?.departments.get(&department_id).cloned())
    }

    async fn departments_named(
        &self,
        business_id: BusinessId,
        name: &str,
    ) -> Result<Vec<Department>, StoreError> {
        Ok(self
            .read()?
            .departments
            .values()
            .filter(|d| d.business_id == business_id && d.name == name)
            .cloned()
            .collect())
    }

    async fn insert_department(&self, department: NewDepartment) -> Result<Department, StoreError> {
        self.write()?.insert_department(department, false)
    }

    async fn delete_department(&self, department_id: DepartmentId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.departments.contains_key(&department_id) {
            return Err(StoreError::NotFound(format!("department {department_id}")));
        }
        let role_ids: Vec<RoleId> = tables
            .roles
            .values()
            .filter(|r| r.department_id == department_id)
            .map(|r| r.id)
            .collect();
        if tables
            .user_roles
            .values()
            .any(|ur| role_ids.contains(&ur.role_id))
        {
            return Err(StoreError::ForeignKeyViolation(format!(
                "department {department_id} has assigned roles"
            )));
        }
        for role_id in role_ids {
            tables.remove_role(role_id);
        }
        tables.departments.remove(&department_id);
        Ok(())
    }

    async fn role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.get(&role_id).cloned())
    }

    async fn roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Vec<Role>, StoreError> {
        Ok(self
            .read()?
            .roles
            .values()
            .filter(|r| r.department_id == department_id)
            .cloned()
            .collect())
    }

    async fn insert_role(&self, role: NewRole) -> Result<Role, StoreError> {
        self.write()?.insert_role(role, false)
    }

    async fn delete_role(&self, role_id: RoleId) -> Result<(), StoreError> {
        let mut tables = self.write()?;
        if !tables.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound(format!("role {role_id}")));
        }
        if tables.role_assignments(role_id) > 0 {
            return Err(StoreError::ForeignKeyViolation(format!(
                "role {role_id} is still assigned"
            )));
        }
        tables.remove_role(role_id);
        Ok(())
    }

    async fn role_grants_for_user(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<RoleGrant>, StoreError> {
        let tables = self.read()?;
        let grants = tables
            .user_roles
            .values()
            .filter(|ur| ur.user_id == user_id && ur.business_id == business_id)
            .filter_map(|ur| tables.roles.get(&ur.role_id))
            .map(|role| RoleGrant {
                role_id: role.id,
                department_id: role.department_id,
                access: role.access,
                flags: tables
                    .permissions
                    .get(&role.permission_id)
                    .copied()
                    .unwrap_or_default(),
            })
            .collect();
        Ok(grants)
    }

    async fn user_in_department(
        &self,
        user_id: UserId,
        department_id: DepartmentId,
    ) -> Result<bool, StoreError> {
        let tables = self.read()?;
        Ok(tables.user_roles.values().any(|ur| {
            ur.user_id == user_id
                && tables
                    .roles
                    .get(&ur.role_id)
                    .is_some_and(|r| r.department_id == department_id)
        }))
    }

    async fn user_roles_in_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<UserRole>, StoreError> {
        Ok(self
            .read()?
            .user_roles
            .values()
            .filter(|ur| ur.user_id == user_id && ur.business_id == business_id)
            .cloned()
            .collect())
    }

    async fn insert_user_role(&self, user_role: NewUserRole) -> Result<UserRole, StoreError> {
        self.write()?.insert_user_role(user_role)
    }

    async fn delete_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool, StoreError> {
        let mut tables = self.write()?;
        let before = tables.user_roles.len();
        tables
            .user_roles
            .retain(|_, ur| !(ur.user_id == user_id && ur.role_id == role_id));
        Ok(tables.user_roles.len() < before)
    }

    async fn count_user_roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<u64, StoreError> {
        let tables = self.read()?;
        let count = tables
            .user_roles
            .values()
            .filter(|ur| {
                tables
                    .roles
                    .get(&ur.role_id)
                    .is_some_and(|r| r.department_id == department_id)
            })
            .count();
        Ok(count as u64)
    }

    async fn count_user_roles_for_role(&self, role_id: RoleId) -> Result<u64, StoreError> {
        Ok(self.read()?.role_assignments(role_id) as u64)
    }
}
