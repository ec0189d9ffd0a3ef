use std::sync::Arc;
use std::time::Duration;

use super::cache::{SessionCache, SessionKey};
use super::credentials::CredentialVerifier;
use super::error::{ServiceError, SessionError};
use super::jwt::{subject_id, TokenService};
use super::pipeline::{bounded, store_session};
use super::session::materialize_user;
use crate::config::SessionConfig;
use crate::dtos::auth::{LoginResponse, LoginUser};
use crate::models::UserSession;
use crate::repositories::UserRepository;
use crate::utils::Password;

/// Login and refresh: the flows that mint token pairs.
#[derive(Clone)]
pub struct AuthService {
    verifier: CredentialVerifier,
    users: Arc<dyn UserRepository>,
    tokens: TokenService,
    cache: Arc<dyn SessionCache>,
    backend_timeout: Duration,
    single_use_refresh: bool,
}

impl AuthService {
    pub fn new(
        verifier: CredentialVerifier,
        users: Arc<dyn UserRepository>,
        tokens: TokenService,
        cache: Arc<dyn SessionCache>,
        session: &SessionConfig,
    ) -> Self {
        Self {
            verifier,
            users,
            tokens,
            cache,
            backend_timeout: session.backend_timeout(),
            single_use_refresh: session.refresh_token_single_use,
        }
    }

    pub async fn login(
        &self,
        email: &str,
        password: &Password,
        origin: &str,
    ) -> Result<LoginResponse, ServiceError> {
        let principal = self.verifier.authenticate(email, password, origin).await?;
        let session = materialize_user(&principal);

        let response = self.issue(session).await?;
        tracing::info!(
            user_id = %principal.user.id,
            tenant_id = %principal.tenant.id,
            origin,
            "User logged in"
        );
        Ok(response)
    }

    /// Exchange a refresh token for a new pair built from a fresh load of the user.
    pub async fn refresh(&self, refresh_token: &str) -> Result<LoginResponse, ServiceError> {
        let claims = self
            .tokens
            .validate_refresh(refresh_token)
            .map_err(ServiceError::RefreshToken)?;
        let user_id = subject_id(&claims.sub).map_err(ServiceError::RefreshToken)?;

        if self.single_use_refresh {
            let consumed = bounded(
                "session cache",
                self.backend_timeout,
                self.cache.put_if_absent(
                    &SessionKey::refresh(&claims.jti),
                    &user_id.to_string(),
                    Duration::from_secs(claims.remaining_seconds()),
                ),
                SessionError::CacheUnavailable,
            )
            .await
            .map_err(ServiceError::Session)?;

            if !consumed {
                return Err(ServiceError::RefreshTokenReused);
            }
        }

        let principal = bounded(
            "credential store",
            self.backend_timeout,
            self.users.find_principal_by_id(user_id),
            SessionError::StoreUnavailable,
        )
        .await
        .map_err(ServiceError::Session)?
        .ok_or(ServiceError::UserNotFound)?;

        let response = self.issue(materialize_user(&principal)).await?;
        tracing::info!(user_id = %user_id, "Token pair refreshed");
        Ok(response)
    }

    /// Mint a pair for `session` and cache it under the new access token.
    async fn issue(&self, session: UserSession) -> Result<LoginResponse, ServiceError> {
        let roles: Vec<String> = session.roles.iter().cloned().collect();
        let policies: Vec<String> = session.policies.iter().cloned().collect();

        let pair = self
            .tokens
            .issue_token_pair(session.user.id, &roles, &policies)
            .map_err(ServiceError::TokenGeneration)?;

        store_session(
            self.cache.as_ref(),
            &SessionKey::token(&pair.access_token),
            &session,
            self.tokens.access_ttl(),
            self.backend_timeout,
        )
        .await
        .map_err(ServiceError::SessionStore)?;

        let user = session.user;
        Ok(LoginResponse {
            token_type: "bearer".to_string(),
            token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: LoginUser {
                id: user.id,
                name: user.name,
                username: user.username,
                email: user.email,
                thumbnail: user.thumbnail,
            },
            roles,
            policies,
        })
    }
}
