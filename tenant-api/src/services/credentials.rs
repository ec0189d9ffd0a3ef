use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::error::SessionError;
use super::pipeline::bounded;
use crate::models::{TenantPrincipal, UserPrincipal};
use crate::repositories::{TenantRepository, UserRepository};
use crate::utils::{verify_password, Password, PasswordHashString};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no principal matches the credential and origin")]
    NotFound,

    #[error("password does not match")]
    InvalidPassword,

    #[error("credential store failure: {0}")]
    Unavailable(SessionError),
}

/// Checks passwords and API keys against the store, scoped by origin.
#[derive(Clone)]
pub struct CredentialVerifier {
    users: Arc<dyn UserRepository>,
    tenants: Arc<dyn TenantRepository>,
    timeout: Duration,
}

impl CredentialVerifier {
    /// Every store lookup is abandoned after `timeout`.
    pub fn new(
        users: Arc<dyn UserRepository>,
        tenants: Arc<dyn TenantRepository>,
        timeout: Duration,
    ) -> Self {
        Self {
            users,
            tenants,
            timeout,
        }
    }

    /// Resolve a user by email among tenants that allow `origin`, then check
    /// the password. Roles and grants come back loaded.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &Password,
        origin: &str,
    ) -> Result<UserPrincipal, CredentialError> {
        let principal = bounded(
            "credential store",
            self.timeout,
            self.users.find_for_login(email, origin),
            SessionError::StoreUnavailable,
        )
        .await
        .map_err(CredentialError::Unavailable)?
        .ok_or(CredentialError::NotFound)?;

        let digest = PasswordHashString::new(principal.user.password_hash.clone());
        if !verify_password(password, &digest) {
            return Err(CredentialError::InvalidPassword);
        }

        Ok(principal)
    }

    /// Resolve a tenant by exact API key among tenants that allow `origin`.
    ///
    /// Keys are stored and compared in plaintext by the store.
    pub async fn authenticate_by_api_key(
        &self,
        api_key: &str,
        origin: &str,
    ) -> Result<TenantPrincipal, CredentialError> {
        bounded(
            "credential store",
            self.timeout,
            self.tenants.find_by_api_key(api_key, origin),
            SessionError::StoreUnavailable,
        )
        .await
        .map_err(CredentialError::Unavailable)?
        .ok_or(CredentialError::NotFound)
    }
}
