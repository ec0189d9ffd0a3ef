pub mod auth;
pub mod origin;

pub use auth::{api_key_auth_middleware, bearer_auth_middleware};
pub use origin::{normalize_origin, origin_middleware, ClientOrigin};
