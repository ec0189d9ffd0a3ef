pub mod role;
pub mod session;
pub mod tenant;
pub mod user;

pub use role::{PolicyGrant, PolicyRule, Role};
pub use session::{SessionContext, SessionTenant, SessionUser, TenantSession, UserSession};
pub use tenant::{Tenant, TenantPrincipal, TenantStatus};
pub use user::{User, UserPrincipal};
