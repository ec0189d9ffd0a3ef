use serde::{Deserialize, Serialize};

/// Permission to perform `action` on resources matching `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyGrant {
    pub resource: String,
    pub action: String,
}

impl PolicyGrant {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// `resource:action`, the form carried in sessions and tokens.
    pub fn policy_string(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub grants: Vec<PolicyGrant>,
}

impl Role {
    pub fn new(name: impl Into<String>, grants: Vec<PolicyGrant>) -> Self {
        Self {
            name: name.into(),
            grants,
        }
    }
}

/// One row of the policy table: `subject` (a role name, user id or tenant id)
/// may perform `action` on `object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }
}
