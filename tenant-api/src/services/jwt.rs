use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;

/// HMAC family accepted on validation. Tokens are issued with HS256.
const ACCEPTED_ALGORITHMS: [Algorithm; 3] = [Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("signature is invalid")]
    BadSignature,
    #[error("token is expired")]
    Expired,
    #[error("signing algorithm not allowed")]
    WrongAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims for access tokens (short-lived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub typ: TokenKind,
    pub roles: Vec<String>,
    pub policies: Vec<String>,
    /// Unique per issuance so two tokens minted in the same second differ
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    /// Time left before expiry, never below one second.
    pub fn remaining(&self) -> std::time::Duration {
        std::time::Duration::from_secs((self.exp - Utc::now().timestamp()).max(1) as u64)
    }
}

/// Claims for refresh tokens (long-lived). Carries no authorization data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub sub: String,
    pub typ: TokenKind,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl RefreshTokenClaims {
    /// Seconds until expiry, never below one.
    pub fn remaining_seconds(&self) -> u64 {
        (self.exp - Utc::now().timestamp()).max(1) as u64
    }
}

/// Claims with an expiry instant, in seconds since the epoch.
trait Expiring {
    fn expires_at(&self) -> i64;
}

impl Expiring for AccessTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl Expiring for RefreshTokenClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Issues and validates HMAC-signed access/refresh token pairs.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], access_ttl: Duration, refresh_ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn from_config(config: &JwtConfig) -> Self {
        let service = Self::new(
            config.secret.expose_secret().as_bytes(),
            Duration::minutes(config.access_token_expiry_minutes),
            Duration::days(config.refresh_token_expiry_days),
        );
        tracing::info!(
            access_minutes = config.access_token_expiry_minutes,
            refresh_days = config.refresh_token_expiry_days,
            "Token service initialized with HS256"
        );
        service
    }

    /// Access-token lifetime, also the TTL of the cached session.
    pub fn access_ttl(&self) -> std::time::Duration {
        self.access_ttl.to_std().unwrap_or_default()
    }

    pub fn issue_token_pair(
        &self,
        principal_id: Uuid,
        roles: &[String],
        policies: &[String],
    ) -> Result<TokenPair, anyhow::Error> {
        let now = Utc::now();
        let header = Header::new(Algorithm::HS256);

        let access = AccessTokenClaims {
            sub: principal_id.to_string(),
            typ: TokenKind::Access,
            roles: roles.to_vec(),
            policies: policies.to_vec(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
        };
        let refresh = RefreshTokenClaims {
            sub: principal_id.to_string(),
            typ: TokenKind::Refresh,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.refresh_ttl).timestamp(),
        };

        let access_token = encode(&header, &access, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;
        let refresh_token = encode(&header, &refresh, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    pub fn validate_access(&self, token: &str) -> Result<AccessTokenClaims, TokenError> {
        let claims: AccessTokenClaims = self.decode_checked(token)?;
        if claims.typ != TokenKind::Access {
            return Err(TokenError::Malformed);
        }
        Ok(claims)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<RefreshTokenClaims, TokenError> {
        let claims: RefreshTokenClaims = self.decode_checked(token)?;
        if claims.typ != TokenKind::Refresh {
            return Err(TokenError::Malformed);
        }
        Ok(claims)
    }

    /// Validate a refresh token and return only its subject.
    ///
    /// Issuing the next pair is left to the caller, which must reload the
    /// principal first.
    pub fn refresh(&self, token: &str) -> Result<Uuid, TokenError> {
        let claims = self.validate_refresh(token)?;
        subject_id(&claims.sub)
    }

    fn decode_checked<T: DeserializeOwned + Expiring>(&self, token: &str) -> Result<T, TokenError> {
        // The header is inspected before jsonwebtoken sees it: `none` and
        // unknown names would otherwise surface as a parse failure.
        match header_algorithm(token)?.parse::<Algorithm>() {
            Ok(alg) if ACCEPTED_ALGORITHMS.contains(&alg) => {}
            _ => return Err(TokenError::WrongAlgorithm),
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = ACCEPTED_ALGORITHMS.to_vec();
        validation.leeway = 0;
        validation.validate_exp = true;

        let claims = decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidAlgorithm => TokenError::WrongAlgorithm,
                _ => TokenError::Malformed,
            })?;

        // jsonwebtoken still accepts `exp == now`; the expiry instant itself is dead.
        if claims.expires_at() <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// Parse a `sub` claim as a principal id.
pub fn subject_id(sub: &str) -> Result<Uuid, TokenError> {
    Uuid::parse_str(sub).map_err(|_| TokenError::Malformed)
}

fn header_algorithm(token: &str) -> Result<String, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let raw: RawHeader = serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)?;
    Ok(raw.alg)
}
