//! Identity and resource policy evaluation
//!
//! Provides dual-policy access control with:
//! - JSON policy documents validated at load time
//! - Allow/Deny statements with explicit deny precedence
//! - Glob pattern matching for principals, actions, and resources
//! - Bounded, fail-closed condition expressions
//! - LRU caching of compiled conditions

mod cache;
mod condition;
mod engine;
mod entity;
mod pattern;
mod policy;

pub use condition::{
    validate_expression, ConditionError, ConditionEvaluator, ConditionLimits, ExpressionEvaluator,
};
pub use engine::{AuthorizationEngine, AuthorizationEngineBuilder};
pub use entity::{Decision, DecisionReason, Principal, Resource, Role};
pub use pattern::{Glob, GlobError, PatternMatcher};
pub use policy::{Effect, Policy, Statement, StatementBuilder};
