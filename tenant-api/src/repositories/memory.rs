//! In-memory directory for tests and local runs without a database.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::{HealthCheck, PolicyRepository, TenantRepository, UserRepository, WriteError};
use crate::models::{
    PolicyGrant, PolicyRule, Role, Tenant, TenantPrincipal, User, UserPrincipal,
};
use crate::utils::{generate_api_key, hash_password, Password};

pub const MASTER_EMAIL: &str = "master@domain.local";
pub const MASTER_PASSWORD: &str = "master123";
pub const COORDINATOR_EMAIL: &str = "coordinator@domain.local";
pub const COORDINATOR_PASSWORD: &str = "coordinator123";

#[derive(Default)]
struct DirectoryState {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    roles: BTreeMap<String, Role>,
    user_roles: HashMap<Uuid, Vec<String>>,
    tenant_roles: HashMap<Uuid, Vec<String>>,
    user_grants: HashMap<Uuid, Vec<PolicyGrant>>,
    tenant_grants: HashMap<Uuid, Vec<PolicyGrant>>,
    unavailable: bool,
    latency: Option<Duration>,
}

impl DirectoryState {
    fn roles_named(&self, names: Option<&Vec<String>>) -> Vec<Role> {
        names
            .into_iter()
            .flatten()
            .filter_map(|name| self.roles.get(name).cloned())
            .collect()
    }

    fn user_principal(&self, user: &User) -> Option<UserPrincipal> {
        let tenant = self
            .tenants
            .get(&user.tenant_id)
            .filter(|t| t.is_active())?
            .clone();
        Some(UserPrincipal {
            user: user.clone(),
            tenant,
            roles: self.roles_named(self.user_roles.get(&user.id)),
            direct_grants: self.user_grants.get(&user.id).cloned().unwrap_or_default(),
        })
    }

    /// Another user of the same tenant already holds this email.
    fn email_taken(&self, user: &User) -> bool {
        self.users.values().any(|u| {
            u.id != user.id && u.tenant_id == user.tenant_id && u.email == user.email
        })
    }

    /// Another tenant already holds this CPF/CNPJ.
    fn document_taken(&self, tenant: &Tenant) -> bool {
        tenant.cpf_cnpj.as_deref().is_some_and(|doc| {
            self.tenants
                .values()
                .any(|t| t.id != tenant.id && t.cpf_cnpj.as_deref() == Some(doc))
        })
    }
}

/// Identifiers produced by [`InMemoryDirectory::seeded`].
#[derive(Debug, Clone)]
pub struct SeedData {
    pub master_tenant_id: Uuid,
    pub master_user_id: Uuid,
    pub coordinator_user_id: Uuid,
    pub api_key: String,
}

/// Tables held in process, mirroring the relational schema.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory with a master tenant, an `admin` user and a `coordinator` user.
    ///
    /// The master tenant accepts `localhost` and `localhost:3000`. `admin` may
    /// read and write tenants and users; `coordinator` may only read users.
    /// The tenant itself may call the API-key lookup.
    pub fn seeded() -> Result<(Self, SeedData), anyhow::Error> {
        let directory = Self::new();

        let mut tenant = Tenant::new(
            "Master",
            vec!["localhost".to_string(), "localhost:3000".to_string()],
        );
        let api_key = generate_api_key();
        tenant.api_key = Some(api_key.clone());
        tenant.email = Some("contato@domain.local".to_string());
        let tenant_id = tenant.id;
        directory.insert_tenant(tenant);

        let mut admin_grants = Vec::new();
        for collection in ["/api/v1/tenants", "/api/v1/users"] {
            let item = format!("{collection}/:id");
            admin_grants.push(PolicyGrant::new(collection, "GET"));
            admin_grants.push(PolicyGrant::new(collection, "POST"));
            for action in ["GET", "PUT", "PATCH", "DELETE"] {
                admin_grants.push(PolicyGrant::new(item.as_str(), action));
            }
        }
        directory.upsert_role(Role::new("admin", admin_grants));
        directory.upsert_role(Role::new(
            "coordinator",
            vec![
                PolicyGrant::new("/api/v1/users", "GET"),
                PolicyGrant::new("/api/v1/users/:id", "GET"),
            ],
        ));

        let master = User::new(
            tenant_id,
            "master",
            "Master",
            MASTER_EMAIL,
            hash_password(&Password::new(MASTER_PASSWORD.to_string()))?.into_string(),
        );
        let master_user_id = master.id;
        directory.insert_user(master);
        directory.assign_user_role(master_user_id, "admin");

        let coordinator = User::new(
            tenant_id,
            "coordinator",
            "Coordinator",
            COORDINATOR_EMAIL,
            hash_password(&Password::new(COORDINATOR_PASSWORD.to_string()))?.into_string(),
        );
        let coordinator_user_id = coordinator.id;
        directory.insert_user(coordinator);
        directory.assign_user_role(coordinator_user_id, "coordinator");

        directory.grant_tenant(
            tenant_id,
            PolicyGrant::new("/api/v1/auth-apikey/tenant-by-apikey", "GET"),
        );

        Ok((
            directory,
            SeedData {
                master_tenant_id: tenant_id,
                master_user_id,
                coordinator_user_id,
                api_key,
            },
        ))
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        if let Ok(mut state) = self.state.write() {
            state.tenants.insert(tenant.id, tenant);
        }
    }

    pub fn insert_user(&self, user: User) {
        if let Ok(mut state) = self.state.write() {
            state.users.insert(user.id, user);
        }
    }

    pub fn remove_user(&self, id: Uuid) -> bool {
        self.state
            .write()
            .map(|mut state| state.users.remove(&id).is_some())
            .unwrap_or(false)
    }

    pub fn upsert_role(&self, role: Role) {
        if let Ok(mut state) = self.state.write() {
            state.roles.insert(role.name.clone(), role);
        }
    }

    pub fn assign_user_role(&self, user_id: Uuid, role: &str) {
        if let Ok(mut state) = self.state.write() {
            state
                .user_roles
                .entry(user_id)
                .or_default()
                .push(role.to_string());
        }
    }

    pub fn assign_tenant_role(&self, tenant_id: Uuid, role: &str) {
        if let Ok(mut state) = self.state.write() {
            state
                .tenant_roles
                .entry(tenant_id)
                .or_default()
                .push(role.to_string());
        }
    }

    pub fn grant_user(&self, user_id: Uuid, grant: PolicyGrant) {
        if let Ok(mut state) = self.state.write() {
            state.user_grants.entry(user_id).or_default().push(grant);
        }
    }

    pub fn grant_tenant(&self, tenant_id: Uuid, grant: PolicyGrant) {
        if let Ok(mut state) = self.state.write() {
            state.tenant_grants.entry(tenant_id).or_default().push(grant);
        }
    }

    /// Remove `grant` from role `role`. Returns whether anything was removed.
    pub fn revoke_role_grant(&self, role: &str, grant: &PolicyGrant) -> bool {
        let Ok(mut state) = self.state.write() else {
            return false;
        };
        match state.roles.get_mut(role) {
            Some(role) => {
                let before = role.grants.len();
                role.grants.retain(|g| g != grant);
                role.grants.len() != before
            }
            None => false,
        }
    }

    pub fn set_tenant_status(&self, tenant_id: Uuid, status: &str) {
        if let Ok(mut state) = self.state.write() {
            if let Some(tenant) = state.tenants.get_mut(&tenant_id) {
                tenant.status = status.to_string();
            }
        }
    }

    /// Make every query fail, as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.write() {
            state.unavailable = unavailable;
        }
    }

    /// Delay every query by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut state) = self.state.write() {
            state.latency = latency;
        }
    }

    async fn read<T>(
        &self,
        f: impl FnOnce(&DirectoryState) -> T,
    ) -> Result<T, anyhow::Error> {
        let latency = {
            let state = self
                .state
                .read()
                .map_err(|_| anyhow::anyhow!("directory lock poisoned"))?;
            if state.unavailable {
                return Err(anyhow::anyhow!("directory unavailable"));
            }
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self
            .state
            .read()
            .map_err(|_| anyhow::anyhow!("directory lock poisoned"))?;
        Ok(f(&state))
    }

    /// Same outage and latency behaviour as [`Self::read`], with a write lock.
    async fn write<T>(
        &self,
        f: impl FnOnce(&mut DirectoryState) -> T,
    ) -> Result<T, anyhow::Error> {
        self.read(|_| ()).await?;
        let mut state = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("directory lock poisoned"))?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl UserRepository for InMemoryDirectory {
    async fn find_for_login(
        &self,
        email: &str,
        origin: &str,
    ) -> Result<Option<UserPrincipal>, anyhow::Error> {
        self.read(|state| {
            state
                .users
                .values()
                .filter(|u| u.email == email)
                .filter(|u| {
                    state
                        .tenants
                        .get(&u.tenant_id)
                        .is_some_and(|t| t.allows_origin(origin))
                })
                .find_map(|u| state.user_principal(u))
        })
        .await
    }

    async fn find_principal_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<UserPrincipal>, anyhow::Error> {
        self.read(|state| state.users.get(&id).and_then(|u| state.user_principal(u)))
            .await
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<User>, anyhow::Error> {
        self.read(|state| {
            let mut users: Vec<User> = state
                .users
                .values()
                .filter(|u| u.tenant_id == tenant_id)
                .cloned()
                .collect();
            users.sort_by(|a, b| a.name.cmp(&b.name));
            users
        })
        .await
    }

    async fn find_in_tenant(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<User>, anyhow::Error> {
        self.read(|state| {
            state
                .users
                .get(&id)
                .filter(|u| u.tenant_id == tenant_id)
                .cloned()
        })
        .await
    }

    async fn create(&self, user: &User) -> Result<(), WriteError> {
        self.write(|state| {
            if state.email_taken(user) {
                return Err(WriteError::Duplicate("email"));
            }
            state.users.insert(user.id, user.clone());
            Ok(())
        })
        .await?
    }

    async fn update(&self, user: &User) -> Result<bool, WriteError> {
        self.write(|state| {
            if !state
                .users
                .get(&user.id)
                .is_some_and(|u| u.tenant_id == user.tenant_id)
            {
                return Ok(false);
            }
            if state.email_taken(user) {
                return Err(WriteError::Duplicate("email"));
            }
            let mut updated = user.clone();
            if let Some(existing) = state.users.get(&user.id) {
                updated.created_at = existing.created_at;
            }
            state.users.insert(user.id, updated);
            Ok(true)
        })
        .await?
    }

    async fn delete_in_tenant(&self, tenant_id: Uuid, id: Uuid) -> Result<bool, anyhow::Error> {
        self.write(|state| {
            if !state.users.get(&id).is_some_and(|u| u.tenant_id == tenant_id) {
                return false;
            }
            state.users.remove(&id);
            state.user_roles.remove(&id);
            state.user_grants.remove(&id);
            true
        })
        .await
    }
}

#[async_trait]
impl TenantRepository for InMemoryDirectory {
    async fn find_by_api_key(
        &self,
        api_key: &str,
        origin: &str,
    ) -> Result<Option<TenantPrincipal>, anyhow::Error> {
        self.read(|state| {
            state
                .tenants
                .values()
                .find(|t| {
                    t.api_key
                        .as_deref()
                        .is_some_and(|k| bool::from(k.as_bytes().ct_eq(api_key.as_bytes())))
                })
                .filter(|t| t.is_active() && t.allows_origin(origin))
                .map(|t| TenantPrincipal {
                    tenant: t.clone(),
                    roles: state.roles_named(state.tenant_roles.get(&t.id)),
                    direct_grants: state.tenant_grants.get(&t.id).cloned().unwrap_or_default(),
                })
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Tenant>, anyhow::Error> {
        self.read(|state| {
            let mut tenants: Vec<Tenant> = state.tenants.values().cloned().collect();
            tenants.sort_by(|a, b| a.name.cmp(&b.name));
            tenants
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Tenant>, anyhow::Error> {
        self.read(|state| state.tenants.get(&id).cloned()).await
    }

    async fn create(&self, tenant: &Tenant) -> Result<(), WriteError> {
        self.write(|state| {
            if state.document_taken(tenant) {
                return Err(WriteError::Duplicate("cpf_cnpj"));
            }
            state.tenants.insert(tenant.id, tenant.clone());
            Ok(())
        })
        .await?
    }

    async fn update(&self, tenant: &Tenant) -> Result<bool, WriteError> {
        self.write(|state| {
            let Some(existing) = state.tenants.get(&tenant.id) else {
                return Ok(false);
            };
            if state.document_taken(tenant) {
                return Err(WriteError::Duplicate("cpf_cnpj"));
            }
            let updated = Tenant {
                api_key: existing.api_key.clone(),
                created_at: existing.created_at,
                ..tenant.clone()
            };
            state.tenants.insert(tenant.id, updated);
            Ok(true)
        })
        .await?
    }

    async fn delete(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        self.write(|state| {
            if state.tenants.remove(&id).is_none() {
                return false;
            }
            let members: Vec<Uuid> = state
                .users
                .values()
                .filter(|u| u.tenant_id == id)
                .map(|u| u.id)
                .collect();
            for user_id in members {
                state.users.remove(&user_id);
                state.user_roles.remove(&user_id);
                state.user_grants.remove(&user_id);
            }
            state.tenant_roles.remove(&id);
            state.tenant_grants.remove(&id);
            true
        })
        .await
    }
}

#[async_trait]
impl HealthCheck for InMemoryDirectory {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.read(|_| ()).await
    }
}

#[async_trait]
impl PolicyRepository for InMemoryDirectory {
    /// Same projection as the `policy_rules` view: role grants keyed by role
    /// name, direct grants keyed by user or tenant id.
    async fn load_rules(&self) -> Result<Vec<PolicyRule>, anyhow::Error> {
        self.read(|state| {
            let role_rules = state.roles.values().flat_map(|role| {
                role.grants
                    .iter()
                    .map(|g| PolicyRule::new(&role.name, &g.resource, &g.action))
            });
            let user_rules = state.user_grants.iter().flat_map(|(id, grants)| {
                grants
                    .iter()
                    .map(move |g| PolicyRule::new(id.to_string(), &g.resource, &g.action))
            });
            let tenant_rules = state.tenant_grants.iter().flat_map(|(id, grants)| {
                grants
                    .iter()
                    .map(move |g| PolicyRule::new(id.to_string(), &g.resource, &g.action))
            });
            role_rules.chain(user_rules).chain(tenant_rules).collect()
        })
        .await
    }
}
