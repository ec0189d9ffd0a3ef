use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use service_core::error::ErrorBody;
use thiserror::Error;

use super::credentials::CredentialError;
use super::jwt::TokenError;

pub const INTERNAL_ERROR: &str = "Erro interno do servidor";

/// Failures while resolving a session from cache or store.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session cache unavailable: {0}")]
    CacheUnavailable(anyhow::Error),

    #[error("credential store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),

    #[error("{0} did not answer in time")]
    Timeout(&'static str),

    #[error("cached session payload is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("principal no longer resolves")]
    PrincipalNotFound,
}

impl SessionError {
    /// Server-side fault, as opposed to a credential that no longer resolves.
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, SessionError::PrincipalNotFound)
    }
}

/// A stored policy row that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("invalid resource pattern '{0}'")]
    InvalidPattern(String),

    #[error("invalid action expression '{0}'")]
    InvalidAction(String),
}

/// Failures of the login and refresh flows.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("credentials rejected: {0}")]
    Credentials(CredentialError),

    #[error("refresh token rejected: {0}")]
    RefreshToken(TokenError),

    #[error("refresh token already used")]
    RefreshTokenReused,

    #[error("user not found")]
    UserNotFound,

    #[error("token generation failed: {0}")]
    TokenGeneration(anyhow::Error),

    #[error("session could not be stored: {0}")]
    SessionStore(SessionError),

    #[error("session lookup failed: {0}")]
    Session(SessionError),
}

impl From<CredentialError> for ServiceError {
    /// A store that fails or stalls is a server fault, not a bad credential.
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Unavailable(e) => ServiceError::Session(e),
            other => ServiceError::Credentials(other),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // Unknown user and wrong password read the same to the client.
            ServiceError::Credentials(_) => {
                tracing::warn!(error = %self, "Login rejected");
                (StatusCode::UNAUTHORIZED, "Credenciais inválidas")
            }
            ServiceError::RefreshToken(_) | ServiceError::RefreshTokenReused => {
                tracing::warn!(error = %self, "Refresh rejected");
                (StatusCode::UNAUTHORIZED, "Token inválido ou expirado")
            }
            ServiceError::UserNotFound => {
                tracing::warn!(error = %self, "Refresh rejected");
                (StatusCode::UNAUTHORIZED, "Usuário não encontrado")
            }
            ServiceError::TokenGeneration(_) => {
                tracing::error!(error = %self, "Token generation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Falha ao gerar tokens")
            }
            ServiceError::SessionStore(_) => {
                tracing::error!(error = %self, "Session write failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Falha ao salvar informações do usuário",
                )
            }
            ServiceError::Session(_) => {
                tracing::error!(error = %self, "Session lookup failed");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR)
            }
        };

        (status, Json(ErrorBody::new(message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body(res: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn credential_failures_are_indistinguishable() {
        let not_found = ServiceError::Credentials(CredentialError::NotFound).into_response();
        let bad_password =
            ServiceError::Credentials(CredentialError::InvalidPassword).into_response();

        assert_eq!(not_found.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(bad_password.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body(not_found).await, body(bad_password).await);
    }

    #[tokio::test]
    async fn store_failures_do_not_leak() {
        let err = ServiceError::from(CredentialError::Unavailable(
            SessionError::StoreUnavailable(anyhow::anyhow!("connection refused 10.0.0.7:5432")),
        ));
        assert!(matches!(err, ServiceError::Session(_)));
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(res).await, serde_json::json!({ "error": INTERNAL_ERROR }));
    }

    #[tokio::test]
    async fn store_timeouts_are_server_faults() {
        let res = ServiceError::from(CredentialError::Unavailable(SessionError::Timeout(
            "credential store",
        )))
        .into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body(res).await, serde_json::json!({ "error": INTERNAL_ERROR }));
    }

    #[test]
    fn only_missing_principals_are_client_faults() {
        assert!(!SessionError::PrincipalNotFound.is_infrastructure());
        assert!(SessionError::Timeout("session cache").is_infrastructure());
    }
}
