use serde::Deserialize;
use sqlx::types::Json;
use validator::Validate;

use crate::middleware::normalize_origin;
use crate::models::{Tenant, TenantStatus};

/// Body of `POST /api/v1/tenants` and `PUT /api/v1/tenants/:id`. Every field is replaced.
#[derive(Debug, Deserialize, Validate)]
pub struct TenantRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,

    #[validate(length(min = 11, max = 18, message = "Invalid CPF/CNPJ"))]
    pub cpf_cnpj: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 15))]
    pub phone: Option<String>,

    #[serde(default)]
    pub allowed_origins: Vec<String>,

    pub status: Option<TenantStatus>,
}

impl TenantRequest {
    pub fn into_tenant(self) -> Tenant {
        let mut tenant = Tenant::new(String::new(), Vec::new());
        self.apply(&mut tenant);
        tenant
    }

    pub fn apply(self, tenant: &mut Tenant) {
        tenant.name = self.name;
        tenant.cpf_cnpj = self.cpf_cnpj;
        tenant.email = self.email;
        tenant.phone = self.phone;
        tenant.allowed_origins = Json(origins(self.allowed_origins));
        tenant.status = self.status.unwrap_or(TenantStatus::Ativo).as_str().to_string();
    }
}

/// Body of `PATCH /api/v1/tenants/:id`. The CPF/CNPJ is fixed after creation, so a
/// `cpf_cnpj` key is ignored.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct TenantPatch {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 15))]
    pub phone: Option<String>,

    pub allowed_origins: Option<Vec<String>>,

    pub status: Option<TenantStatus>,
}

impl TenantPatch {
    pub fn apply(self, tenant: &mut Tenant) {
        if let Some(name) = self.name {
            tenant.name = name;
        }
        if let Some(email) = self.email {
            tenant.email = Some(email);
        }
        if let Some(phone) = self.phone {
            tenant.phone = Some(phone);
        }
        if let Some(allowed) = self.allowed_origins {
            tenant.allowed_origins = Json(origins(allowed));
        }
        if let Some(status) = self.status {
            tenant.status = status.as_str().to_string();
        }
    }
}

/// Stored origins are scheme-less, like the ones requests are matched with.
fn origins(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for origin in raw {
        let origin = normalize_origin(&origin);
        if !origin.is_empty() && !out.iter().any(|o| o == origin) {
            out.push(origin.to_string());
        }
    }
    out
}
