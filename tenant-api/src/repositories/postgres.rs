//! PostgreSQL-backed repositories.

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnection, PgPool},
    types::Json,
    FromRow,
};
use uuid::Uuid;

use super::{HealthCheck, PolicyRepository, TenantRepository, UserRepository, WriteError};
use crate::models::{
    PolicyGrant, PolicyRule, Role, Tenant, TenantPrincipal, TenantStatus, User, UserPrincipal,
};

const TENANT_COLUMNS: &str =
    "t.id, t.name, t.cpf_cnpj, t.email, t.phone, t.allowed_origins, t.api_key, t.status, t.created_at";

const USER_COLUMNS: &str =
    "u.id, u.tenant_id, u.username, u.name, u.email, u.password_hash, u.thumbnail, u.created_at";

#[derive(Debug, FromRow)]
struct RoleGrantRow {
    role_name: String,
    resource: Option<String>,
    action: Option<String>,
}

#[derive(Debug, FromRow)]
struct GrantRow {
    resource: String,
    action: String,
}

/// Shared handle over the connection pool; implements every repository trait.
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Load tenant, roles and direct grants for `user` on one connection.
    async fn load_user_principal(
        conn: &mut PgConnection,
        user: User,
    ) -> Result<Option<UserPrincipal>, sqlx::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants t WHERE t.id = $1"
        ))
        .bind(user.tenant_id)
        .fetch_optional(&mut *conn)
        .await?;

        // A user whose tenant vanished or was deactivated cannot hold a session.
        let Some(tenant) = tenant.filter(Tenant::is_active) else {
            return Ok(None);
        };

        let role_rows = sqlx::query_as::<_, RoleGrantRow>(
            r#"
            SELECT r.name AS role_name, e.name AS resource, p.action AS action
            FROM users_roles ur
            JOIN roles r ON r.id = ur.role_id
            LEFT JOIN permissions_roles pr ON pr.role_id = r.id
            LEFT JOIN permissions p ON p.id = pr.permission_id
            LEFT JOIN endpoints e ON e.id = p.endpoint_id
            WHERE ur.user_id = $1
            "#,
        )
        .bind(user.id)
        .fetch_all(&mut *conn)
        .await?;

        let direct_rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT e.name AS resource, p.action AS action
            FROM permissions_users pu
            JOIN permissions p ON p.id = pu.permission_id
            JOIN endpoints e ON e.id = p.endpoint_id
            WHERE pu.user_id = $1
            "#,
        )
        .bind(user.id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(UserPrincipal {
            user,
            tenant,
            roles: group_roles(role_rows),
            direct_grants: direct_rows
                .into_iter()
                .map(|r| PolicyGrant::new(r.resource, r.action))
                .collect(),
        }))
    }
}

/// Unique violations name the rejected field; anything else is a store failure.
fn write_error(err: sqlx::Error, duplicate: &'static str) -> WriteError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => WriteError::Duplicate(duplicate),
        _ => WriteError::Store(err.into()),
    }
}

/// Fold `(role, resource?, action?)` rows into roles; a role without grants
/// still appears.
fn group_roles(rows: Vec<RoleGrantRow>) -> Vec<Role> {
    let mut roles: Vec<Role> = Vec::new();
    for row in rows {
        let idx = match roles.iter().position(|r| r.name == row.role_name) {
            Some(idx) => idx,
            None => {
                roles.push(Role::new(row.role_name, Vec::new()));
                roles.len() - 1
            }
        };
        if let (Some(resource), Some(action)) = (row.resource, row.action) {
            roles[idx].grants.push(PolicyGrant::new(resource, action));
        }
    }
    roles
}

#[async_trait]
impl UserRepository for PgDirectory {
    async fn find_for_login(
        &self,
        email: &str,
        origin: &str,
    ) -> Result<Option<UserPrincipal>, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            JOIN tenants t ON t.id = u.tenant_id
            WHERE u.email = $1 AND t.allowed_origins @> $2 AND t.status = $3
            "#
        ))
        .bind(email)
        .bind(Json(vec![origin]))
        .bind(TenantStatus::Ativo.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let principal = match user {
            Some(user) => Self::load_user_principal(&mut tx, user).await?,
            None => None,
        };

        tx.commit().await?;
        Ok(principal)
    }

    async fn find_principal_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<UserPrincipal>, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let principal = match user {
            Some(user) => Self::load_user_principal(&mut tx, user).await?,
            None => None,
        };

        tx.commit().await?;
        Ok(principal)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, anyhow::Error> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.tenant_id = $1 ORDER BY u.name"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn find_in_tenant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<User>, anyhow::Error> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users u WHERE u.tenant_id = $1 AND u.id = $2"
        ))
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn create(&self, user: &User) -> Result<(), WriteError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, tenant_id, username, name, email, password_hash, thumbnail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.thumbnail)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "email"))?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<bool, WriteError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET username = $3, name = $4, email = $5, password_hash = $6, thumbnail = $7
            WHERE id = $1 AND tenant_id = $2
            "#,
        )
        .bind(user.id)
        .bind(user.tenant_id)
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.thumbnail)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "email"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_in_tenant(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TenantRepository for PgDirectory {
    async fn find_by_api_key(
        &self,
        api_key: &str,
        origin: &str,
    ) -> Result<Option<TenantPrincipal>, anyhow::Error> {
        let mut tx = self.pool.begin().await?;

        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            r#"
            SELECT {TENANT_COLUMNS}
            FROM tenants t
            WHERE t.api_key = $1 AND t.allowed_origins @> $2 AND t.status = $3
            "#
        ))
        .bind(api_key)
        .bind(Json(vec![origin]))
        .bind(TenantStatus::Ativo.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(tenant) = tenant else {
            tx.commit().await?;
            return Ok(None);
        };

        let role_rows = sqlx::query_as::<_, RoleGrantRow>(
            r#"
            SELECT r.name AS role_name, e.name AS resource, p.action AS action
            FROM tenants_roles tr
            JOIN roles r ON r.id = tr.role_id
            LEFT JOIN permissions_roles pr ON pr.role_id = r.id
            LEFT JOIN permissions p ON p.id = pr.permission_id
            LEFT JOIN endpoints e ON e.id = p.endpoint_id
            WHERE tr.tenant_id = $1
            "#,
        )
        .bind(tenant.id)
        .fetch_all(&mut *tx)
        .await?;

        let direct_rows = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT e.name AS resource, p.action AS action
            FROM permissions_tenants pt
            JOIN permissions p ON p.id = pt.permission_id
            JOIN endpoints e ON e.id = p.endpoint_id
            WHERE pt.tenant_id = $1
            "#,
        )
        .bind(tenant.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(TenantPrincipal {
            tenant,
            roles: group_roles(role_rows),
            direct_grants: direct_rows
                .into_iter()
                .map(|r| PolicyGrant::new(r.resource, r.action))
                .collect(),
        }))
    }

    async fn list(&self) -> Result<Vec<Tenant>, anyhow::Error> {
        let tenants = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants t ORDER BY t.name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, anyhow::Error> {
        let tenant = sqlx::query_as::<_, Tenant>(&format!(
            "SELECT {TENANT_COLUMNS} FROM tenants t WHERE t.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    async fn create(&self, tenant: &Tenant) -> Result<(), WriteError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (id, name, cpf_cnpj, email, phone, allowed_origins, api_key, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.cpf_cnpj)
        .bind(&tenant.email)
        .bind(&tenant.phone)
        .bind(&tenant.allowed_origins)
        .bind(&tenant.api_key)
        .bind(&tenant.status)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "cpf_cnpj"))?;
        Ok(())
    }

    async fn update(&self, tenant: &Tenant) -> Result<bool, WriteError> {
        let result = sqlx::query(
            r#"
            UPDATE tenants
            SET name = $2, cpf_cnpj = $3, email = $4, phone = $5, allowed_origins = $6, status = $7
            WHERE id = $1
            "#,
        )
        .bind(tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.cpf_cnpj)
        .bind(&tenant.email)
        .bind(&tenant.phone)
        .bind(&tenant.allowed_origins)
        .bind(&tenant.status)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, "cpf_cnpj"))?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl HealthCheck for PgDirectory {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for PgDirectory {
    async fn load_rules(&self) -> Result<Vec<PolicyRule>, anyhow::Error> {
        let rules = sqlx::query_as::<_, PolicyRule>(
            "SELECT subject, object, action FROM policy_rules",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rules)
    }
}
