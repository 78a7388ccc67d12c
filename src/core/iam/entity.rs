//! Principals, roles, resources, and authorization decisions
//!
//! Entities carry an opaque JSON `attributes` payload for application data.
//! Identity is the `id` alone: two principals with the same id are equal
//! regardless of roles, policy, or attributes.

use super::policy::{Policy, Statement};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A named grouping of permissions held by principals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Role {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Role {
            id: id.into(),
            name: name.into(),
            policy: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    fn to_context(&self) -> Value {
        let attributes: Map<String, Value> = self
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        json!({
            "id": self.id,
            "name": self.name,
            "attributes": attributes,
        })
    }
}

impl PartialEq for Role {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Role {}

impl Hash for Role {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The acting identity in an authorization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(default)]
    pub attributes: Value,
}

impl Principal {
    /// Principal with no roles, no policy, and null attributes
    pub fn new(id: impl Into<String>) -> Self {
        Principal {
            id: id.into(),
            roles: Vec::new(),
            policy: None,
            attributes: Value::Null,
        }
    }

    pub fn with_roles(mut self, roles: Vec<Role>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// Role ids in role order
    pub fn role_ids(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(|r| r.id.as_str())
    }

    /// View exposed to condition expressions as `principal`
    pub fn to_context(&self) -> Value {
        json!({
            "id": self.id,
            "roles": self.roles.iter().map(Role::to_context).collect::<Vec<_>>(),
            "role_ids": self.role_ids().collect::<Vec<_>>(),
            "attributes": self.attributes,
        })
    }
}

impl PartialEq for Principal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Principal {}

impl Hash for Principal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// The target of an authorization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(default)]
    pub attributes: Value,
}

impl Resource {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Resource {
            id: id.into(),
            resource_type: resource_type.into(),
            policy: None,
            attributes: Value::Null,
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_attributes(mut self, attributes: Value) -> Self {
        self.attributes = attributes;
        self
    }

    /// View exposed to condition expressions as `resource`
    pub fn to_context(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.resource_type,
            "attributes": self.attributes,
        })
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    /// A matching Deny statement on either side
    ExplicitDeny,
    /// Matching Allow statements on both sides and no Deny
    BothAllow,
    /// Default deny
    NoMatchingAllow,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::ExplicitDeny => "Explicit deny",
            DecisionReason::BothAllow => "Both identity and resource policies allow",
            DecisionReason::NoMatchingAllow => {
                "No matching allow policies from both identity and resource"
            }
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DecisionReason {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Outcome of an authorization request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    /// Identity-side matches first, then resource-side, each in policy order
    pub matched_statements: Vec<Statement>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}
