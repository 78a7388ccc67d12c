//! Dual-policy evaluation engine with deny precedence
//!
//! Evaluates identity-side statements (the principal's policy, then each
//! role's policy) and resource-side statements (the resource's policy):
//! - Explicit deny on either side takes precedence over any allow
//! - Access requires a matching Allow on BOTH sides
//! - Anything else is the default deny
//!
//! The engine holds no decision state. Its only internal state is the
//! condition evaluator's compiled-expression cache.

use super::condition::{evaluation_root, ConditionEvaluator, ExpressionEvaluator};
use super::entity::{Decision, DecisionReason, Principal, Resource};
use super::pattern::PatternMatcher;
use super::policy::{Effect, Statement};
use crate::core::config::EngineConfig;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Which policy a statement came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicySide {
    Identity,
    Resource,
}

/// Authorization engine
///
/// `Send + Sync`; share one instance across threads behind an `Arc`.
#[derive(Clone)]
pub struct AuthorizationEngine {
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl AuthorizationEngine {
    /// Engine with the built-in expression evaluator and default limits
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(ExpressionEvaluator::default()))
    }

    /// Engine using a caller-supplied condition evaluator
    pub fn with_evaluator(evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        AuthorizationEngine { evaluator }
    }

    /// Engine with the built-in evaluator configured from `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_evaluator(Arc::new(ExpressionEvaluator::from_config(config)))
    }

    pub fn builder() -> AuthorizationEngineBuilder {
        AuthorizationEngineBuilder::new()
    }

    /// The condition evaluator in use
    pub fn evaluator(&self) -> &Arc<dyn ConditionEvaluator> {
        &self.evaluator
    }

    /// Decide whether `principal` may perform `action` on `resource`
    ///
    /// The action is qualified with the resource type before matching, so
    /// `read` on a `document` is matched as `document:read`.
    ///
    /// # Examples
    ///
    /// ```
    /// use authzen::iam::{AuthorizationEngine, Policy, Principal, Resource, Statement};
    ///
    /// // Identity statements must name their principals
    /// let identity = Policy::new(vec![Statement::allow()
    ///     .principals(["user-*"])
    ///     .actions(["document:read"])
    ///     .resources(["doc-*"])
    ///     .build()
    ///     .unwrap()])
    /// .unwrap();
    /// let resource_side = Policy::new(vec![Statement::allow()
    ///     .actions(["document:*"])
    ///     .resources(["doc-123"])
    ///     .build()
    ///     .unwrap()])
    /// .unwrap();
    ///
    /// let engine = AuthorizationEngine::new();
    /// let principal = Principal::new("user-1").with_policy(identity);
    /// let resource = Resource::new("doc-123", "document").with_policy(resource_side);
    ///
    /// assert!(engine.authorize(&principal, &resource, "read", None).allowed);
    /// assert!(!engine.authorize(&principal, &resource, "write", None).allowed);
    /// ```
    pub fn authorize(
        &self,
        principal: &Principal,
        resource: &Resource,
        action: &str,
        context: Option<&Value>,
    ) -> Decision {
        let full_action = format!("{}:{}", resource.resource_type, action);

        let identity_statements = principal
            .policy
            .iter()
            .chain(principal.roles.iter().filter_map(|r| r.policy.as_ref()))
            .flat_map(|p| p.statements());
        let resource_statements = resource.policy.iter().flat_map(|p| p.statements());

        let candidates: Vec<&str> = std::iter::once(principal.id.as_str())
            .chain(principal.role_ids())
            .collect();

        // Built lazily: most statements are rejected on action or resource
        // before their condition is ever consulted
        let mut request = MatchRequest {
            full_action: &full_action,
            resource_id: &resource.id,
            candidates: &candidates,
            evaluator: self.evaluator.as_ref(),
            root: None,
            build_root: &|| {
                evaluation_root(
                    principal.to_context(),
                    resource.to_context(),
                    action,
                    context,
                )
            },
        };

        let identity_matches: Vec<&Statement> = identity_statements
            .filter(|s| request.matches(s, PolicySide::Identity))
            .collect();
        let resource_matches: Vec<&Statement> = resource_statements
            .filter(|s| request.matches(s, PolicySide::Resource))
            .collect();

        let reason = if has_effect(&identity_matches, Effect::Deny)
            || has_effect(&resource_matches, Effect::Deny)
        {
            DecisionReason::ExplicitDeny
        } else if has_effect(&identity_matches, Effect::Allow)
            && has_effect(&resource_matches, Effect::Allow)
        {
            DecisionReason::BothAllow
        } else {
            DecisionReason::NoMatchingAllow
        };

        debug!(
            principal = %principal.id,
            resource = %resource.id,
            action = %full_action,
            identity_matches = identity_matches.len(),
            resource_matches = resource_matches.len(),
            "{}",
            reason
        );

        Decision {
            allowed: reason == DecisionReason::BothAllow,
            reason,
            matched_statements: identity_matches
                .into_iter()
                .chain(resource_matches)
                .cloned()
                .collect(),
        }
    }
}

impl Default for AuthorizationEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn has_effect(matches: &[&Statement], effect: Effect) -> bool {
    matches.iter().any(|s| s.effect() == Some(effect))
}

/// Per-request matching state
struct MatchRequest<'a> {
    full_action: &'a str,
    resource_id: &'a str,
    candidates: &'a [&'a str],
    evaluator: &'a dyn ConditionEvaluator,
    root: Option<Value>,
    build_root: &'a dyn Fn() -> Value,
}

impl MatchRequest<'_> {
    fn matches(&mut self, statement: &Statement, side: PolicySide) -> bool {
        if !PatternMatcher::matches_any(statement.actions(), self.full_action) {
            return false;
        }
        if !PatternMatcher::matches_any(statement.resources(), self.resource_id) {
            return false;
        }
        if !self.principal_matches(statement, side) {
            return false;
        }

        match statement.condition() {
            Some(condition) if !condition.trim().is_empty() => {
                let build_root = self.build_root;
                let root = self.root.get_or_insert_with(build_root);
                self.evaluator.evaluate(Some(condition), root)
            }
            _ => true,
        }
    }

    fn principal_matches(&self, statement: &Statement, side: PolicySide) -> bool {
        // Asymmetric on purpose: an empty `principals` list matches every
        // principal on a resource policy and none on an identity policy.
        if statement.principals().is_empty() {
            return side == PolicySide::Resource;
        }

        let named = self
            .candidates
            .iter()
            .any(|id| PatternMatcher::matches_any(statement.principals(), id));
        if !named {
            return false;
        }

        !self
            .candidates
            .iter()
            .any(|id| PatternMatcher::matches_any(statement.not_principals(), id))
    }
}

/// Builder for [`AuthorizationEngine`]
///
/// ```
/// use authzen::iam::AuthorizationEngine;
/// use authzen::EngineConfig;
///
/// let engine = AuthorizationEngine::builder()
///     .config(EngineConfig {
///         evaluation_fuel: 500,
///         ..EngineConfig::default()
///     })
///     .build();
/// # let _ = engine;
/// ```
#[derive(Default)]
pub struct AuthorizationEngineBuilder {
    config: Option<EngineConfig>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
}

impl AuthorizationEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limits and cache size for the built-in evaluator
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the built-in evaluator; `config` is then ignored
    pub fn condition_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn build(self) -> AuthorizationEngine {
        match (self.evaluator, self.config) {
            (Some(evaluator), _) => AuthorizationEngine::with_evaluator(evaluator),
            (None, Some(config)) => AuthorizationEngine::from_config(&config),
            (None, None) => AuthorizationEngine::new(),
        }
    }
}
