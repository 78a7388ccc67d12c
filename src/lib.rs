//! # AuthZen - Dual-Policy Authorization Engine
//!
//! `authzen` answers one question: may this principal perform this action on
//! this resource? Decisions follow an identity-plus-resource model:
//!
//! - **Identity policies** attach to the principal and to each of its roles
//! - **Resource policies** attach to the resource
//! - **Both sides must allow**, and an explicit deny on either side wins
//! - **Glob patterns** for principals, actions, and resources
//! - **Conditions**: small, bounded, fail-closed boolean expressions
//!
//! ## Quick Start
//!
//! ```rust
//! use authzen::{AuthZen, Policy, Principal, Resource, Result, Statement};
//!
//! # fn main() -> Result<()> {
//! let policy = Policy::new(vec![Statement::allow()
//!     .principals(["user-1"])
//!     .actions(["document:read"])
//!     .resources(["doc-123"])
//!     .build()?])?;
//!
//! let principal = Principal::new("user-1").with_policy(policy.clone());
//! let resource = Resource::new("doc-123", "document").with_policy(policy);
//!
//! let authz = AuthZen::new();
//! let decision = authz.authorize(&principal, &resource, "read");
//! assert!(decision.allowed);
//! assert_eq!(decision.reason.as_str(), "Both identity and resource policies allow");
//! # Ok(())
//! # }
//! ```
//!
//! ## Conditions
//!
//! ```rust
//! use authzen::{AuthZen, Policy, Principal, Resource, Result, Statement};
//! use serde_json::json;
//!
//! # fn main() -> Result<()> {
//! let identity = Policy::new(vec![Statement::allow()
//!     .principals(["user-*"])
//!     .actions(["document:read"])
//!     .resources(["*"])
//!     .condition("context.time == 'business_hours'")
//!     .build()?])?;
//! let resource_side = Policy::from_json(
//!     r#"{ "statements": [ { "effect": "ALLOW", "actions": ["*"], "resources": ["*"] } ] }"#,
//! )?;
//!
//! let principal = Principal::new("user-1").with_policy(identity);
//! let resource = Resource::new("doc-1", "document").with_policy(resource_side);
//! let authz = AuthZen::new();
//!
//! let ctx = json!({ "time": "after_hours" });
//! assert!(!authz.authorize_with_context(&principal, &resource, "read", &ctx).allowed);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::iam;
pub use crate::core::service;

pub use crate::core::config::EngineConfig;
pub use crate::core::iam::{
    AuthorizationEngine, AuthorizationEngineBuilder, ConditionEvaluator, Decision, DecisionReason,
    Effect, ExpressionEvaluator, PatternMatcher, Policy, Principal, Resource, Role, Statement,
    StatementBuilder,
};
pub use crate::core::service::{
    AuthorizationService, EntityEvent, EventSink, EventType, InMemoryRepository,
    PrincipalPolicyRecord, RolePolicyRecord,
};
pub use error::{AuthzError, Result};

use serde_json::Value;
use tracing::info;

/// Entry point wrapping an [`AuthorizationEngine`]
#[derive(Clone, Default)]
pub struct AuthZen {
    engine: AuthorizationEngine,
}

impl AuthZen {
    /// Engine with the built-in condition evaluator and default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine configured from `config`, validated first
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.check()?;
        info!(
            "Creating authorization engine (condition cache: {}, fuel: {})",
            config.condition_cache_capacity, config.evaluation_fuel
        );
        Ok(AuthZen {
            engine: AuthorizationEngine::from_config(config),
        })
    }

    /// Wrap an existing engine, e.g. one with a custom condition evaluator
    pub fn with_engine(engine: AuthorizationEngine) -> Self {
        AuthZen { engine }
    }

    pub fn authorize(&self, principal: &Principal, resource: &Resource, action: &str) -> Decision {
        self.engine.authorize(principal, resource, action, None)
    }

    /// Like [`authorize`](Self::authorize), exposing `context` to conditions
    pub fn authorize_with_context(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: &str,
        context: &Value,
    ) -> Decision {
        self.engine
            .authorize(principal, resource, action, Some(context))
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }
}
