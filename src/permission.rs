use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Caller identity ("auth data") threaded implicitly through scoped contexts.
///
/// Immutable for the lifetime of one activation. Absence of an `AuthData`
/// (`None`) means the caller is unauthenticated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthData {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Application-defined claims carried alongside the identity.
    #[serde(default)]
    pub claims: BTreeMap<String, serde_json::Value>,
}

impl AuthData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            claims: BTreeMap::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.claims.insert(key.into(), value);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role.as_deref() == Some(role)
    }

    pub fn claim(&self, key: &str) -> Option<&serde_json::Value> {
        self.claims.get(key)
    }
}
