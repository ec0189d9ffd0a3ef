//! Tenant model: the root of every user and the holder of the API key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow};
use uuid::Uuid;

use super::role::{PolicyGrant, Role};

/// Tenant status codes as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TenantStatus {
    Ativo,
    Inativo,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Ativo => "ATIVO",
            TenantStatus::Inativo => "INATIVO",
        }
    }
}

/// Tenant entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub cpf_cnpj: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Scheme-less origins (`host[:port]`) allowed to authenticate as this tenant.
    pub allowed_origins: Json<Vec<String>>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>, allowed_origins: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cpf_cnpj: None,
            email: None,
            phone: None,
            allowed_origins: Json(allowed_origins),
            api_key: None,
            status: TenantStatus::Ativo.as_str().to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Ativo.as_str()
    }

    /// Exact, case-sensitive membership test on a normalised origin.
    pub fn allows_origin(&self, origin: &str) -> bool {
        self.allowed_origins.0.iter().any(|o| o == origin)
    }
}

/// A tenant loaded together with everything needed to build its API-key session.
#[derive(Debug, Clone)]
pub struct TenantPrincipal {
    pub tenant: Tenant,
    pub roles: Vec<Role>,
    pub direct_grants: Vec<PolicyGrant>,
}
