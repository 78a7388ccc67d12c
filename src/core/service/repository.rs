//! Storage seams for resolving principals, roles, and resources

use crate::core::iam::{Policy, Resource, Role};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Stored identity-side policy for a principal and the roles it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalPolicyRecord {
    pub principal_id: String,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

impl PrincipalPolicyRecord {
    pub fn new(principal_id: impl Into<String>, policy: Policy, role_ids: Vec<String>) -> Self {
        PrincipalPolicyRecord {
            principal_id: principal_id.into(),
            policy,
            role_ids,
        }
    }

    /// Record used when a principal has nothing stored
    pub fn empty(principal_id: impl Into<String>) -> Self {
        Self::new(principal_id, Policy::empty(), Vec::new())
    }
}

/// Stored role definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyRecord {
    pub role_id: String,
    pub name: String,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl RolePolicyRecord {
    pub fn new(role_id: impl Into<String>, name: impl Into<String>, policy: Policy) -> Self {
        RolePolicyRecord {
            role_id: role_id.into(),
            name: name.into(),
            policy,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }
}

impl From<RolePolicyRecord> for Role {
    fn from(record: RolePolicyRecord) -> Self {
        Role {
            id: record.role_id,
            name: record.name,
            policy: Some(record.policy),
            attributes: record.attributes,
        }
    }
}

pub trait ResourceRepository: Send + Sync {
    fn find_by_id(&self, id: &str) -> Result<Option<Resource>>;

    fn save(&self, resource: Resource) -> Result<Resource>;

    fn delete_by_id(&self, id: &str) -> Result<()>;
}

pub trait PrincipalPolicyRepository: Send + Sync {
    fn find_by_principal_id(&self, principal_id: &str) -> Result<Option<PrincipalPolicyRecord>>;

    fn save(&self, record: PrincipalPolicyRecord) -> Result<PrincipalPolicyRecord>;

    fn delete_by_principal_id(&self, principal_id: &str) -> Result<()>;
}

pub trait RolePolicyRepository: Send + Sync {
    fn find_by_id(&self, role_id: &str) -> Result<Option<RolePolicyRecord>>;

    /// Records for the given ids, in request order; unknown ids are skipped
    fn find_by_ids(&self, role_ids: &[String]) -> Result<Vec<RolePolicyRecord>>;

    fn save(&self, record: RolePolicyRecord) -> Result<RolePolicyRecord>;

    fn delete_by_id(&self, role_id: &str) -> Result<()>;
}
