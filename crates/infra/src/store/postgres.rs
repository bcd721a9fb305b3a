//! Postgres-backed entity store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `UniqueViolation` | Second primary role, second default membership, second Admin department, duplicate assignment |
//! | Database (foreign key violation) | `23503` | `ForeignKeyViolation` | Unknown business/department/role referenced |
//! | Database (other) | Any other | `Database` | Check constraints, syntax, permissions |
//! | PoolClosed / PoolTimedOut | N/A | `Database` | Pool exhausted or shut down |
//! | Other | N/A | `Database` | Network errors, decode failures |
//!
//! Multi-statement writes run in one transaction. Returning early with `?`
//! drops the transaction, which rolls it back.

use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{instrument, Span};

use onboard_auth::{AccessTier, Grant, PermissionFlags};
use onboard_core::{BusinessId, DepartmentId, PermissionId, RoleId, UserId, UserRoleId};

use super::records::{
    BootstrappedBusiness, Business, Department, Membership, NewBusiness, NewDepartment,
    NewMembership, NewRole, NewUserRole, Role, RoleGrant, UserRole, ADMIN_DEPARTMENT,
    GENERAL_ROLE,
};
use super::r#trait::{EntityStore, StoreError};

/// Schema migrations shipped with this crate.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const BUSINESS_COLUMNS: &str = "id, name, address, city, province, postal_code";
const MEMBERSHIP_COLUMNS: &str =
    "user_id, business_id, accepted, default_option, token, token_expiry, created_on";
const DEPARTMENT_COLUMNS: &str = "id, business_id, name, prevent_edit, prevent_delete";
const ROLE_COLUMNS: &str =
    "id, department_id, name, access, permission_id, prevent_edit, prevent_delete";
const USER_ROLE_COLUMNS: &str =
    "id, user_id, role_id, business_id, primary_role_for_user, updated_by_user_id";

/// Postgres-backed entity store.
///
/// Every query filters by the tenant key it was given; the partial unique
/// indexes of the schema back the store-level invariants.
#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait::async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self), fields(user_id = %user_id, membership_count), err)]
    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<Membership>, StoreError> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM membership WHERE user_id = $1 ORDER BY created_on DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("memberships_for_user", e))?;

        let memberships = rows
            .iter()
            .map(membership_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("membership_count", memberships.len());
        Ok(memberships)
    }

    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id), err)]
    async fn membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Option<Membership>, StoreError> {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM membership WHERE user_id = $1 AND business_id = $2"
        );
        sqlx::query(&sql)
            .bind(user_id.get())
            .bind(business_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("membership", e))?
            .as_ref()
            .map(membership_from_row)
            .transpose()
    }

    #[instrument(skip(self, token), err)]
    async fn membership_by_token(&self, token: &str) -> Result<Option<Membership>, StoreError> {
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM membership WHERE token = $1");
        sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("membership_by_token", e))?
            .as_ref()
            .map(membership_from_row)
            .transpose()
    }

    #[instrument(
        skip(self, membership),
        fields(user_id = %membership.user_id, business_id = %membership.business_id),
        err
    )]
    async fn insert_membership(&self, membership: NewMembership) -> Result<Membership, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO membership (user_id, business_id, accepted, default_option, token, token_expiry)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(membership.user_id.get())
            .bind(membership.business_id.get())
            .bind(membership.accepted)
            .bind(membership.default_option)
            .bind(membership.token)
            .bind(membership.token_expiry)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_membership", e))?;
        membership_from_row(&row)
    }

    #[instrument(skip(self, token), fields(user_id = %user_id, business_id = %business_id), err)]
    async fn refresh_invitation(
        &self,
        user_id: UserId,
        business_id: BusinessId,
        token: String,
        expiry: DateTime<Utc>,
    ) -> Result<Membership, StoreError> {
        let sql = format!(
            r#"
            UPDATE membership SET token = $3, token_expiry = $4
            WHERE user_id = $1 AND business_id = $2 AND NOT accepted
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(user_id.get())
            .bind(business_id.get())
            .bind(token)
            .bind(expiry)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("refresh_invitation", e))?
            .ok_or_else(|| {
                StoreError::NotFound(format!("pending membership ({user_id}, {business_id})"))
            })?;
        membership_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id), err)]
    async fn accept_membership(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Membership, StoreError> {
        // SET expressions see the pre-update row, so `accepted` below is the
        // old value.
        let sql = format!(
            r#"
            UPDATE membership SET
                default_option = CASE
                    WHEN accepted THEN default_option
                    ELSE NOT EXISTS (
                        SELECT 1 FROM membership m
                        WHERE m.user_id = $1 AND m.accepted AND m.default_option
                    )
                END,
                accepted = TRUE,
                token = NULL,
                token_expiry = NULL
            WHERE user_id = $1 AND business_id = $2
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(user_id.get())
            .bind(business_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("accept_membership", e))?
            .ok_or_else(|| StoreError::NotFound(format!("membership ({user_id}, {business_id})")))?;
        membership_from_row(&row)
    }

    #[instrument(
        skip(self),
        fields(user_id = %user_id, from = %from, to = %to),
        err
    )]
    async fn flip_default_membership(
        &self,
        user_id: UserId,
        from: BusinessId,
        to: BusinessId,
    ) -> Result<(), StoreError> {
        let mut tx = self.begin("flip_default_membership").await?;

        // Clear first: the partial unique index forbids two defaults even
        // inside the transaction.
        let cleared = sqlx::query(
            r#"
            UPDATE membership SET default_option = FALSE
            WHERE user_id = $1 AND business_id = $2 AND accepted AND default_option
            "#,
        )
        .bind(user_id.get())
        .bind(from.get())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("clear_default", e))?;

        if cleared.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!(
                "default membership ({user_id}, {from})"
            )));
        }

        let set = sqlx::query(
            r#"
            UPDATE membership SET default_option = TRUE
            WHERE user_id = $1 AND business_id = $2 AND accepted
            "#,
        )
        .bind(user_id.get())
        .bind(to.get())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_default", e))?;

        if set.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!(
                "accepted membership ({user_id}, {to})"
            )));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self, business), fields(registrant = %registrant, business_id), err)]
    async fn bootstrap_business(
        &self,
        registrant: UserId,
        business: NewBusiness,
    ) -> Result<BootstrappedBusiness, StoreError> {
        let mut tx = self.begin("bootstrap_business").await?;

        let sql = format!(
            r#"
            INSERT INTO business (name, address, city, province, postal_code)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {BUSINESS_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(&business.name)
            .bind(&business.address)
            .bind(&business.city)
            .bind(&business.province)
            .bind(&business.postal_code)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_business", e))?;
        let business = business_from_row(&row)?;
        Span::current().record("business_id", business.id.get());

        let admin_department =
            insert_department_tx(&mut tx, business.id, ADMIN_DEPARTMENT, true).await?;
        let general_role = insert_role_tx(
            &mut tx,
            NewRole {
                department_id: admin_department.id,
                name: GENERAL_ROLE.to_string(),
                access: AccessTier::Admin,
                permissions: PermissionFlags::all(),
            },
            true,
        )
        .await?;

        let sql = format!(
            r#"
            INSERT INTO membership (user_id, business_id, accepted, default_option)
            VALUES ($1, $2, TRUE, NOT EXISTS (
                SELECT 1 FROM membership m
                WHERE m.user_id = $1 AND m.accepted AND m.default_option
            ))
            RETURNING {MEMBERSHIP_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(registrant.get())
            .bind(business.id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_registrant_membership", e))?;
        let membership = membership_from_row(&row)?;

        let sql = format!(
            r#"
            INSERT INTO user_role (user_id, role_id, business_id, primary_role_for_user, updated_by_user_id)
            VALUES ($1, $2, $3, TRUE, $1)
            RETURNING {USER_ROLE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(registrant.get())
            .bind(general_role.id.get())
            .bind(business.id.get())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_registrant_role", e))?;
        let user_role = user_role_from_row(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;

        Ok(BootstrappedBusiness {
            business,
            admin_department,
            general_role,
            membership,
            user_role,
        })
    }

    #[instrument(skip(self), fields(business_id = %business_id), err)]
    async fn business(&self, business_id: BusinessId) -> Result<Option<Business>, StoreError> {
        let sql = format!("SELECT {BUSINESS_COLUMNS} FROM business WHERE id = $1");
        sqlx::query(&sql)
            .bind(business_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("business", e))?
            .as_ref()
            .map(business_from_row)
            .transpose()
    }

    #[instrument(skip(self), fields(department_id = %department_id), err)]
    async fn department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Option<Department>, StoreError> {
        let sql = format!("SELECT {DEPARTMENT_COLUMNS} FROM department WHERE id = $1");
        sqlx::query(&sql)
            .bind(department_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("department", e))?
            .as_ref()
            .map(department_from_row)
            .transpose()
    }

    #[instrument(skip(self), fields(business_id = %business_id), err)]
    async fn departments_named(
        &self,
        business_id: BusinessId,
        name: &str,
    ) -> Result<Vec<Department>, StoreError> {
        let sql = format!(
            "SELECT {DEPARTMENT_COLUMNS} FROM department WHERE business_id = $1 AND name = $2 ORDER BY id"
        );
        sqlx::query(&sql)
            .bind(business_id.get())
            .bind(name)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("departments_named", e))?
            .iter()
            .map(department_from_row)
            .collect()
    }

    #[instrument(skip(self, department), fields(business_id = %department.business_id), err)]
    async fn insert_department(&self, department: NewDepartment) -> Result<Department, StoreError> {
        let mut tx = self.begin("insert_department").await?;
        let department =
            insert_department_tx(&mut tx, department.business_id, &department.name, false).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(department)
    }

    #[instrument(skip(self), fields(department_id = %department_id), err)]
    async fn delete_department(&self, department_id: DepartmentId) -> Result<(), StoreError> {
        let mut tx = self.begin("delete_department").await?;

        let in_use: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_role ur
            JOIN role r ON r.id = ur.role_id
            WHERE r.department_id = $1
            "#,
        )
        .bind(department_id.get())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("count_assignments", e))?;
        if in_use > 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::ForeignKeyViolation(format!(
                "department {department_id} has assigned roles"
            )));
        }

        let permission_ids: Vec<i64> =
            sqlx::query_scalar("DELETE FROM role WHERE department_id = $1 RETURNING permission_id")
                .bind(department_id.get())
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_roles", e))?;
        sqlx::query("DELETE FROM permission WHERE id = ANY($1)")
            .bind(&permission_ids)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_permissions", e))?;

        let deleted = sqlx::query("DELETE FROM department WHERE id = $1")
            .bind(department_id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_department", e))?;
        if deleted.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("department {department_id}")));
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn role(&self, role_id: RoleId) -> Result<Option<Role>, StoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM role WHERE id = $1");
        sqlx::query(&sql)
            .bind(role_id.get())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role", e))?
            .as_ref()
            .map(role_from_row)
            .transpose()
    }

    #[instrument(skip(self), fields(department_id = %department_id), err)]
    async fn roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<Vec<Role>, StoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM role WHERE department_id = $1 ORDER BY id");
        sqlx::query(&sql)
            .bind(department_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("roles_in_department", e))?
            .iter()
            .map(role_from_row)
            .collect()
    }

    #[instrument(skip(self, role), fields(department_id = %role.department_id), err)]
    async fn insert_role(&self, role: NewRole) -> Result<Role, StoreError> {
        let mut tx = self.begin("insert_role").await?;
        let role = insert_role_tx(&mut tx, role, false).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(role)
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn delete_role(&self, role_id: RoleId) -> Result<(), StoreError> {
        let mut tx = self.begin("delete_role").await?;

        // Assigned roles are rejected by the user_role foreign key.
        let permission_id: Option<i64> =
            sqlx::query_scalar("DELETE FROM role WHERE id = $1 RETURNING permission_id")
                .bind(role_id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_role", e))?;
        let Some(permission_id) = permission_id else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::NotFound(format!("role {role_id}")));
        };

        sqlx::query("DELETE FROM permission WHERE id = $1")
            .bind(permission_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_permission", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(
        skip(self),
        fields(user_id = %user_id, business_id = %business_id, role_count),
        err
    )]
    async fn role_grants_for_user(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<RoleGrant>, StoreError> {
        let sql = format!(
            r#"
            SELECT r.id AS role_id, r.department_id, r.access, {}
            FROM user_role ur
            JOIN role r ON r.id = ur.role_id
            JOIN permission p ON p.id = r.permission_id
            WHERE ur.user_id = $1 AND ur.business_id = $2
            ORDER BY ur.id
            "#,
            permission_columns("p.")
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.get())
            .bind(business_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_grants_for_user", e))?;

        let grants = rows
            .iter()
            .map(|row| {
                Ok(RoleGrant {
                    role_id: RoleId::new(get(row, "role_id")?),
                    department_id: DepartmentId::new(get(row, "department_id")?),
                    access: access_from_row(row)?,
                    flags: flags_from_row(row)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Span::current().record("role_count", grants.len());
        Ok(grants)
    }

    #[instrument(skip(self), fields(user_id = %user_id, department_id = %department_id), err)]
    async fn user_in_department(
        &self,
        user_id: UserId,
        department_id: DepartmentId,
    ) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_role ur
                JOIN role r ON r.id = ur.role_id
                WHERE ur.user_id = $1 AND r.department_id = $2
            )
            "#,
        )
        .bind(user_id.get())
        .bind(department_id.get())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_in_department", e))
    }

    #[instrument(skip(self), fields(user_id = %user_id, business_id = %business_id), err)]
    async fn user_roles_in_business(
        &self,
        user_id: UserId,
        business_id: BusinessId,
    ) -> Result<Vec<UserRole>, StoreError> {
        let sql = format!(
            "SELECT {USER_ROLE_COLUMNS} FROM user_role WHERE user_id = $1 AND business_id = $2 ORDER BY id"
        );
        sqlx::query(&sql)
            .bind(user_id.get())
            .bind(business_id.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("user_roles_in_business", e))?
            .iter()
            .map(user_role_from_row)
            .collect()
    }

    #[instrument(
        skip(self, user_role),
        fields(
            user_id = %user_role.user_id,
            role_id = %user_role.role_id,
            primary = user_role.primary_role_for_user
        ),
        err
    )]
    async fn insert_user_role(&self, user_role: NewUserRole) -> Result<UserRole, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO user_role (user_id, role_id, business_id, primary_role_for_user, updated_by_user_id)
            SELECT $1, r.id, d.business_id, $3, $4
            FROM role r
            JOIN department d ON d.id = r.department_id
            WHERE r.id = $2
            RETURNING {USER_ROLE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(user_role.user_id.get())
            .bind(user_role.role_id.get())
            .bind(user_role.primary_role_for_user)
            .bind(user_role.updated_by_user_id.map(i64::from))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_user_role", e))?
            .ok_or_else(|| StoreError::NotFound(format!("role {}", user_role.role_id)))?;
        user_role_from_row(&row)
    }

    #[instrument(skip(self), fields(user_id = %user_id, role_id = %role_id), err)]
    async fn delete_user_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM user_role WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.get())
            .bind(role_id.get())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user_role", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(department_id = %department_id), err)]
    async fn count_user_roles_in_department(
        &self,
        department_id: DepartmentId,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM user_role ur
            JOIN role r ON r.id = ur.role_id
            WHERE r.department_id = $1
            "#,
        )
        .bind(department_id.get())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_user_roles_in_department", e))?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self), fields(role_id = %role_id), err)]
    async fn count_user_roles_for_role(&self, role_id: RoleId) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_role WHERE role_id = $1")
            .bind(role_id.get())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_user_roles_for_role", e))?;
        Ok(count.max(0) as u64)
    }
}

async fn insert_department_tx(
    tx: &mut Transaction<'_, Postgres>,
    business_id: BusinessId,
    name: &str,
    locked: bool,
) -> Result<Department, StoreError> {
    let sql = format!(
        r#"
        INSERT INTO department (business_id, name, prevent_edit, prevent_delete)
        VALUES ($1, $2, $3, $3)
        RETURNING {DEPARTMENT_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(business_id.get())
        .bind(name)
        .bind(locked)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_department", e))?;
    department_from_row(&row)
}

async fn insert_role_tx(
    tx: &mut Transaction<'_, Postgres>,
    role: NewRole,
    locked: bool,
) -> Result<Role, StoreError> {
    let placeholders = (1..=Grant::ALL.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO permission ({}) VALUES ({placeholders}) RETURNING id",
        permission_columns("")
    );
    let mut query = sqlx::query_scalar::<_, i64>(&sql);
    for grant in Grant::ALL {
        query = query.bind(role.permissions.get(grant));
    }
    let permission_id = query
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;

    let sql = format!(
        r#"
        INSERT INTO role (department_id, name, access, permission_id, prevent_edit, prevent_delete)
        VALUES ($1, $2, $3, $4, $5, $5)
        RETURNING {ROLE_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(role.department_id.get())
        .bind(&role.name)
        .bind(role.access.as_str())
        .bind(permission_id)
        .bind(locked)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;
    role_from_row(&row)
}

fn permission_columns(prefix: &str) -> String {
    Grant::ALL
        .iter()
        .map(|g| format!("{prefix}{}", g.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::UniqueViolation(msg),
                Some("23503") => StoreError::ForeignKeyViolation(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Database(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row decoding

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Database(format!("failed to read {column}: {e}")))
}

fn business_from_row(row: &PgRow) -> Result<Business, StoreError> {
    Ok(Business {
        id: BusinessId::new(get(row, "id")?),
        name: get(row, "name")?,
        address: get(row, "address")?,
        city: get(row, "city")?,
        province: get(row, "province")?,
        postal_code: get(row, "postal_code")?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<Membership, StoreError> {
    Ok(Membership {
        user_id: UserId::new(get(row, "user_id")?),
        business_id: BusinessId::new(get(row, "business_id")?),
        accepted: get(row, "accepted")?,
        default_option: get(row, "default_option")?,
        token: get(row, "token")?,
        token_expiry: get(row, "token_expiry")?,
        created_on: get(row, "created_on")?,
    })
}

fn department_from_row(row: &PgRow) -> Result<Department, StoreError> {
    Ok(Department {
        id: DepartmentId::new(get(row, "id")?),
        business_id: BusinessId::new(get(row, "business_id")?),
        name: get(row, "name")?,
        prevent_edit: get(row, "prevent_edit")?,
        prevent_delete: get(row, "prevent_delete")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, StoreError> {
    Ok(Role {
        id: RoleId::new(get(row, "id")?),
        department_id: DepartmentId::new(get(row, "department_id")?),
        name: get(row, "name")?,
        access: access_from_row(row)?,
        permission_id: PermissionId::new(get(row, "permission_id")?),
        prevent_edit: get(row, "prevent_edit")?,
        prevent_delete: get(row, "prevent_delete")?,
    })
}

fn user_role_from_row(row: &PgRow) -> Result<UserRole, StoreError> {
    let updated_by: Option<i64> = get(row, "updated_by_user_id")?;
    Ok(UserRole {
        id: UserRoleId::new(get(row, "id")?),
        user_id: UserId::new(get(row, "user_id")?),
        role_id: RoleId::new(get(row, "role_id")?),
        business_id: BusinessId::new(get(row, "business_id")?),
        primary_role_for_user: get(row, "primary_role_for_user")?,
        updated_by_user_id: updated_by.map(UserId::new),
    })
}

fn access_from_row(row: &PgRow) -> Result<AccessTier, StoreError> {
    let access: String = get(row, "access")?;
    access
        .parse()
        .map_err(|e| StoreError::Database(format!("invalid access tier: {e}")))
}

fn flags_from_row(row: &PgRow) -> Result<PermissionFlags, StoreError> {
    let mut flags = PermissionFlags::none();
    for grant in Grant::ALL {
        flags.set(grant, get(row, grant.as_str())?);
    }
    Ok(flags)
}
