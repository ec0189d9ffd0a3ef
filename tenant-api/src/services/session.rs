//! Flattening of loaded principals into cache-ready session records.
//!
//! Both functions are pure: the same principal graph always yields the same
//! record regardless of role or grant order.

use std::collections::BTreeSet;

use crate::models::{
    PolicyGrant, Role, SessionTenant, SessionUser, TenantPrincipal, TenantSession,
    UserPrincipal, UserSession,
};

fn role_names(roles: &[Role]) -> BTreeSet<String> {
    roles.iter().map(|r| r.name.clone()).collect()
}

/// Every `resource:action` reachable through `roles` plus `direct`,
/// deduplicated by the formatted string.
fn policy_strings(roles: &[Role], direct: &[PolicyGrant]) -> BTreeSet<String> {
    roles
        .iter()
        .flat_map(|r| r.grants.iter())
        .chain(direct.iter())
        .map(PolicyGrant::policy_string)
        .collect()
}

pub fn materialize_user(principal: &UserPrincipal) -> UserSession {
    let user = &principal.user;
    UserSession {
        user: SessionUser {
            id: user.id,
            tenant_id: user.tenant_id,
            name: user.name.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            thumbnail: user.thumbnail.clone(),
        },
        roles: role_names(&principal.roles),
        policies: policy_strings(&principal.roles, &principal.direct_grants),
    }
}

pub fn materialize_tenant(principal: &TenantPrincipal) -> TenantSession {
    let tenant = &principal.tenant;
    TenantSession {
        tenant: SessionTenant {
            id: tenant.id,
            name: tenant.name.clone(),
            cpf_cnpj: tenant.cpf_cnpj.clone(),
            email: tenant.email.clone(),
        },
        allowed_origins: tenant.allowed_origins.0.clone(),
        roles: role_names(&principal.roles),
        policies: policy_strings(&principal.roles, &principal.direct_grants),
    }
}
