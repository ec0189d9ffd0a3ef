//! Core services: token issuance, session caching, credential checks,
//! session materialization, policy evaluation and the request pipeline.

mod auth;
pub mod cache;
mod credentials;
pub mod error;
mod jwt;
pub mod pipeline;
pub mod policy;
pub mod session;

pub use auth::AuthService;
pub use cache::{MockSessionCache, RedisSessionCache, SessionCache, SessionKey};
pub use credentials::{CredentialError, CredentialVerifier};
pub use error::{PolicyError, ServiceError, SessionError};
pub use jwt::{AccessTokenClaims, RefreshTokenClaims, TokenError, TokenKind, TokenPair, TokenService};
pub use pipeline::{Credential, Lane, Rejection, RequestPipeline, Stage};
pub use policy::{PolicyEvaluator, PolicyRule, ResourcePattern};
