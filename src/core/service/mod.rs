//! Authorization service: resolve entities from storage, then decide
//!
//! The engine works on fully resolved entities. This layer looks them up
//! through repository traits, assembles the principal with its roles, and
//! delegates to [`AuthorizationEngine`].

mod events;
mod memory;
mod repository;

pub use events::{EntityEvent, EventSink, EventType};
pub use memory::{InMemoryRepository, Keyed};
pub use repository::{
    PrincipalPolicyRecord, PrincipalPolicyRepository, ResourceRepository, RolePolicyRecord,
    RolePolicyRepository,
};

use crate::core::iam::{AuthorizationEngine, Decision, Principal, Role};
use crate::error::{AuthzError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Resolves principals, roles, and resources, then authorizes
pub struct AuthorizationService {
    engine: AuthorizationEngine,
    resources: Arc<dyn ResourceRepository>,
    principal_policies: Arc<dyn PrincipalPolicyRepository>,
    role_policies: Arc<dyn RolePolicyRepository>,
}

impl AuthorizationService {
    pub fn new(
        engine: AuthorizationEngine,
        resources: Arc<dyn ResourceRepository>,
        principal_policies: Arc<dyn PrincipalPolicyRepository>,
        role_policies: Arc<dyn RolePolicyRepository>,
    ) -> Self {
        AuthorizationService {
            engine,
            resources,
            principal_policies,
            role_policies,
        }
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    /// Authorize `action` on a stored resource for a principal by id
    ///
    /// `attributes` is attached to the principal as supplied by the caller
    /// (typically claims from an already authenticated request). A principal
    /// with no stored record has an empty policy and no roles.
    ///
    /// # Errors
    ///
    /// [`AuthzError::ResourceNotFound`] if the resource does not exist, or any
    /// error raised by a repository.
    pub fn authorize(
        &self,
        principal_id: &str,
        attributes: Value,
        resource_id: &str,
        action: &str,
        context: Option<&Value>,
    ) -> Result<Decision> {
        let resource = self
            .resources
            .find_by_id(resource_id)?
            .ok_or_else(|| AuthzError::ResourceNotFound(resource_id.to_string()))?;

        let record = match self.principal_policies.find_by_principal_id(principal_id)? {
            Some(record) => record,
            None => {
                debug!("No stored policy for principal {}", principal_id);
                PrincipalPolicyRecord::empty(principal_id)
            }
        };

        let roles: Vec<Role> = if record.role_ids.is_empty() {
            Vec::new()
        } else {
            self.role_policies
                .find_by_ids(&record.role_ids)?
                .into_iter()
                .map(Role::from)
                .collect()
        };

        let principal = Principal::new(principal_id)
            .with_roles(roles)
            .with_policy(record.policy)
            .with_attributes(attributes);

        Ok(self.engine.authorize(&principal, &resource, action, context))
    }
}
