//! Policy documents and statements
//!
//! Statements and policies are immutable and only come into existence through
//! fallible constructors, so a malformed condition or pattern is rejected when
//! the policy is authored or loaded, never at evaluation time.
//!
//! The plain constructors check conditions against the built-in expression
//! language. Policies written for a custom [`ConditionEvaluator`] go through
//! the `*_with` variants, which ask that evaluator instead.
//!
//! Wire format:
//!
//! ```json
//! { "statements": [
//!     { "effect": "ALLOW",
//!       "principals": ["user-*"],
//!       "notPrincipals": ["user-blocked"],
//!       "actions": ["document:read"],
//!       "resources": ["doc-*"],
//!       "condition": "context.time == 'business_hours'" }
//! ] }
//! ```

use super::condition::{validate_expression, ConditionEvaluator, ConditionLimits};
use super::pattern::PatternMatcher;
use crate::error::{AuthzError, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Effect of a policy statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// A single policy statement
///
/// `effect` is optional: a statement without one is accepted and, when it
/// matches, contributes to neither the allow nor the deny check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StatementDocument")]
pub struct Statement {
    #[serde(skip_serializing_if = "Option::is_none")]
    effect: Option<Effect>,
    principals: Vec<String>,
    not_principals: Vec<String>,
    actions: Vec<String>,
    resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<String>,
}

impl Statement {
    /// Start a statement with the given effect
    pub fn builder(effect: Effect) -> StatementBuilder {
        StatementBuilder::default().effect(effect)
    }

    /// Shorthand for `Statement::builder(Effect::Allow)`
    pub fn allow() -> StatementBuilder {
        Self::builder(Effect::Allow)
    }

    /// Shorthand for `Statement::builder(Effect::Deny)`
    pub fn deny() -> StatementBuilder {
        Self::builder(Effect::Deny)
    }

    /// Build a statement from its parts, validating patterns and condition
    pub fn new(
        effect: Option<Effect>,
        principals: Vec<String>,
        not_principals: Vec<String>,
        actions: Vec<String>,
        resources: Vec<String>,
        condition: Option<String>,
    ) -> Result<Self> {
        let statement = Statement {
            effect,
            principals,
            not_principals,
            actions,
            resources,
            condition,
        };
        statement.validate()?;
        Ok(statement)
    }

    /// Parse a single statement from JSON, checking its condition with
    /// `evaluator`
    pub fn from_json_with(json: &str, evaluator: &dyn ConditionEvaluator) -> Result<Self> {
        let doc: StatementDocument = serde_json::from_str(json)?;
        doc.into_statement(Some(evaluator))
    }

    pub fn effect(&self) -> Option<Effect> {
        self.effect
    }

    pub fn principals(&self) -> &[String] {
        &self.principals
    }

    pub fn not_principals(&self) -> &[String] {
        &self.not_principals
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    /// Check patterns compile and a non-empty condition parses
    pub fn validate(&self) -> Result<()> {
        self.validate_patterns()?;
        if let Some(condition) = self.non_empty_condition() {
            validate_expression(condition, &ConditionLimits::default())?;
        }
        Ok(())
    }

    /// Like [`Statement::validate`], but the condition is checked by
    /// `evaluator`
    pub fn validate_with(&self, evaluator: &dyn ConditionEvaluator) -> Result<()> {
        self.validate_patterns()?;
        if let Some(condition) = self.non_empty_condition() {
            evaluator.validate(condition)?;
        }
        Ok(())
    }

    fn non_empty_condition(&self) -> Option<&str> {
        self.condition.as_deref().filter(|c| !c.is_empty())
    }

    fn validate_patterns(&self) -> Result<()> {
        let fields: [(&'static str, &[String]); 4] = [
            ("principals", &self.principals),
            ("notPrincipals", &self.not_principals),
            ("actions", &self.actions),
            ("resources", &self.resources),
        ];
        for (field, patterns) in fields {
            for pattern in patterns {
                PatternMatcher::validate(pattern).map_err(|e| AuthzError::InvalidStatement {
                    field,
                    reason: format!("pattern `{}`: {}", pattern, e),
                })?;
            }
        }
        Ok(())
    }

    /// Parse a single statement from JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Collects statement fields; `build` validates eagerly
#[derive(Debug, Clone, Default)]
pub struct StatementBuilder {
    effect: Option<Effect>,
    principals: Vec<String>,
    not_principals: Vec<String>,
    actions: Vec<String>,
    resources: Vec<String>,
    condition: Option<String>,
}

impl StatementBuilder {
    pub fn effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }

    pub fn principals<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.principals = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn not_principals<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.not_principals = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn actions<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn resources<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn condition<S: Into<String>>(mut self, condition: S) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn build(self) -> Result<Statement> {
        let statement = self.into_unchecked();
        statement.validate()?;
        Ok(statement)
    }

    /// Build, checking the condition with `evaluator`
    pub fn build_with(self, evaluator: &dyn ConditionEvaluator) -> Result<Statement> {
        let statement = self.into_unchecked();
        statement.validate_with(evaluator)?;
        Ok(statement)
    }

    fn into_unchecked(self) -> Statement {
        Statement {
            effect: self.effect,
            principals: self.principals,
            not_principals: self.not_principals,
            actions: self.actions,
            resources: self.resources,
            condition: self.condition,
        }
    }
}

/// Complete policy document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PolicyDocument")]
pub struct Policy {
    statements: Vec<Statement>,
}

impl Policy {
    /// Create a policy, re-validating every statement
    pub fn new(statements: Vec<Statement>) -> Result<Self> {
        Self::checked(statements, Statement::validate)
    }

    /// Create a policy whose conditions are checked by `evaluator`
    pub fn new_with(statements: Vec<Statement>, evaluator: &dyn ConditionEvaluator) -> Result<Self> {
        Self::checked(statements, |s| s.validate_with(evaluator))
    }

    fn checked<F>(statements: Vec<Statement>, validate: F) -> Result<Self>
    where
        F: Fn(&Statement) -> Result<()>,
    {
        for (i, statement) in statements.iter().enumerate() {
            validate(statement)
                .map_err(|e| AuthzError::InvalidPolicy(format!("statement {}: {}", i, e)))?;
        }
        Ok(Policy { statements })
    }

    /// A policy with no statements
    pub fn empty() -> Self {
        Policy::default()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Parse policy from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse policy from an already decoded JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Parse policy from JSON, checking conditions with `evaluator`
    pub fn from_json_with(json: &str, evaluator: &dyn ConditionEvaluator) -> Result<Self> {
        let doc: RawPolicyDocument = serde_json::from_str(json)?;
        let statements = doc
            .statements
            .flatten()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, stmt)| {
                stmt.into_statement(Some(evaluator))
                    .map_err(|e| AuthzError::InvalidPolicy(format!("statement {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Policy { statements })
    }

    /// Serialize policy to JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`)
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Absent and `null` lists both load as empty
fn list_field(value: Option<Option<Vec<String>>>) -> Vec<String> {
    value.flatten().unwrap_or_default()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementDocument {
    #[serde(default)]
    effect: Option<Effect>,
    #[serde(default, deserialize_with = "present")]
    principals: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "present")]
    not_principals: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "present")]
    actions: Option<Option<Vec<String>>>,
    #[serde(default, deserialize_with = "present")]
    resources: Option<Option<Vec<String>>>,
    #[serde(default)]
    condition: Option<String>,
}

impl StatementDocument {
    fn into_statement(self, evaluator: Option<&dyn ConditionEvaluator>) -> Result<Statement> {
        let statement = Statement {
            effect: self.effect,
            principals: list_field(self.principals),
            not_principals: list_field(self.not_principals),
            actions: list_field(self.actions),
            resources: list_field(self.resources),
            condition: self.condition,
        };
        match evaluator {
            Some(evaluator) => statement.validate_with(evaluator)?,
            None => statement.validate()?,
        }
        Ok(statement)
    }
}

impl TryFrom<StatementDocument> for Statement {
    type Error = AuthzError;

    fn try_from(doc: StatementDocument) -> Result<Self> {
        doc.into_statement(None)
    }
}

#[derive(Deserialize)]
struct PolicyDocument {
    #[serde(default, deserialize_with = "present")]
    statements: Option<Option<Vec<Statement>>>,
}

impl TryFrom<PolicyDocument> for Policy {
    type Error = AuthzError;

    fn try_from(doc: PolicyDocument) -> Result<Self> {
        Policy::new(doc.statements.flatten().unwrap_or_default())
    }
}

/// Policy document whose statements are validated by the caller
#[derive(Deserialize)]
struct RawPolicyDocument {
    #[serde(default, deserialize_with = "present")]
    statements: Option<Option<Vec<StatementDocument>>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults_to_empty_lists() {
        let stmt = Statement::allow().actions(["document:read"]).build().unwrap();

        assert_eq!(stmt.effect(), Some(Effect::Allow));
        assert!(stmt.principals().is_empty());
        assert!(stmt.not_principals().is_empty());
        assert!(stmt.resources().is_empty());
        assert_eq!(stmt.actions(), ["document:read".to_string()]);
        assert_eq!(stmt.condition(), None);
    }

    #[test]
    fn test_invalid_condition_rejected_at_construction() {
        let err = Statement::allow()
            .actions(["*"])
            .condition("context.time ==")
            .build()
            .unwrap_err();

        assert!(matches!(err, AuthzError::InvalidCondition { .. }));
        assert!(err.to_string().contains("context.time =="));
    }

    #[test]
    fn test_empty_condition_is_accepted() {
        let stmt = Statement::allow().condition("").build().unwrap();
        assert_eq!(stmt.condition(), Some(""));
    }

    #[test]
    fn test_malformed_pattern_rejected_with_field_name() {
        let err = Statement::allow()
            .resources(["doc-[0-9"])
            .build()
            .unwrap_err();

        match err {
            AuthzError::InvalidStatement { field, .. } => assert_eq!(field, "resources"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_statement_without_effect_is_accepted() {
        let stmt = Statement::new(None, vec![], vec![], vec!["*".into()], vec![], None).unwrap();
        assert_eq!(stmt.effect(), None);
    }

    #[test]
    fn test_policy_new_revalidates_statements() {
        let valid = Statement::deny().actions(["*:*"]).build().unwrap();
        let policy = Policy::new(vec![valid.clone(), valid]).unwrap();
        assert_eq!(policy.statements().len(), 2);

        assert!(Policy::empty().is_empty());
    }

    #[test]
    fn test_statement_from_wire_json() {
        let stmt = Statement::from_json(
            r#"{
                "effect": "DENY",
                "principals": ["user-2"],
                "notPrincipals": ["user-admin"],
                "actions": ["document:delete"],
                "resources": ["*"],
                "condition": "context.mfa != true"
            }"#,
        )
        .unwrap();

        assert_eq!(stmt.effect(), Some(Effect::Deny));
        assert_eq!(stmt.not_principals(), ["user-admin".to_string()]);
        assert_eq!(stmt.condition(), Some("context.mfa != true"));
    }

    #[test]
    fn test_absent_lists_default_to_empty() {
        let stmt = Statement::from_json(r#"{ "effect": "ALLOW" }"#).unwrap();
        assert!(stmt.principals().is_empty());
        assert!(stmt.actions().is_empty());
    }

    #[test]
    fn test_null_lists_load_as_empty() {
        let stmt = Statement::from_json(
            r#"{ "effect": "ALLOW", "principals": ["user-*"], "notPrincipals": null,
                 "actions": ["document:read"], "resources": null }"#,
        )
        .unwrap();
        assert!(stmt.not_principals().is_empty());
        assert!(stmt.resources().is_empty());
        assert_eq!(stmt.principals(), ["user-*".to_string()]);
    }

    #[test]
    fn test_unknown_effect_rejected() {
        assert!(Statement::from_json(r#"{ "effect": "MAYBE" }"#).is_err());
        assert!(Statement::from_json(r#"{ "effect": "allow" }"#).is_err());
    }

    #[test]
    fn test_policy_with_invalid_condition_rejected_at_load() {
        let json = json!({
            "statements": [
                { "effect": "ALLOW", "actions": ["*"], "condition": "a == (" }
            ]
        });
        let err = Policy::from_value(json).unwrap_err();
        assert!(err.to_string().contains("a == ("));
    }

    #[test]
    fn test_policy_null_statements_load_as_empty() {
        assert!(Policy::from_json(r#"{ "statements": null }"#).unwrap().is_empty());
        assert!(Policy::from_json("{}").unwrap().is_empty());

        let policy = Policy::from_value(json!({
            "statements": [
                { "effect": "DENY", "notPrincipals": null, "actions": ["*"], "resources": ["*"] }
            ]
        }))
        .unwrap();
        assert_eq!(policy.statements().len(), 1);
    }

    /// Accepts any condition that starts with `has(`
    struct HasEvaluator;

    impl ConditionEvaluator for HasEvaluator {
        fn validate(&self, expression: &str) -> Result<()> {
            if expression.starts_with("has(") {
                Ok(())
            } else {
                Err(AuthzError::InvalidCondition {
                    expression: expression.to_string(),
                    reason: "expected has(...)".to_string(),
                })
            }
        }

        fn evaluate(&self, _expression: Option<&str>, _context: &serde_json::Value) -> bool {
            true
        }
    }

    #[test]
    fn test_custom_evaluator_validates_conditions() {
        let builder = Statement::allow()
            .principals(["*"])
            .actions(["*"])
            .condition("has(context.x)");

        assert!(builder.clone().build().is_err());
        let stmt = builder.build_with(&HasEvaluator).unwrap();
        assert!(stmt.validate_with(&HasEvaluator).is_ok());

        assert!(Policy::new(vec![stmt.clone()]).is_err());
        let policy = Policy::new_with(vec![stmt], &HasEvaluator).unwrap();
        assert_eq!(policy.statements().len(), 1);

        let err = Statement::allow()
            .condition("context.x == 1")
            .build_with(&HasEvaluator)
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidCondition { .. }));
    }

    #[test]
    fn test_custom_evaluator_loads_json() {
        let json = r#"{ "statements": [
            { "effect": "ALLOW", "actions": ["*"], "resources": ["*"], "condition": "has(context.x)" }
        ] }"#;

        assert!(Policy::from_json(json).is_err());
        let policy = Policy::from_json_with(json, &HasEvaluator).unwrap();
        assert_eq!(policy.statements()[0].condition(), Some("has(context.x)"));

        let stmt = Statement::from_json_with(
            r#"{ "effect": "DENY", "actions": ["*"], "condition": "has(y)" }"#,
            &HasEvaluator,
        )
        .unwrap();
        assert_eq!(stmt.effect(), Some(Effect::Deny));

        let bad = r#"{ "statements": [ { "effect": "ALLOW", "condition": "x == 1" } ] }"#;
        assert!(Policy::from_json_with(bad, &HasEvaluator).is_err());
    }

    #[test]
    fn test_policy_json_roundtrip() {
        let policy = Policy::new(vec![Statement::allow()
            .principals(["user-*"])
            .actions(["document:read", "document:list"])
            .resources(["doc-*"])
            .condition("context.time == 'business_hours'")
            .build()
            .unwrap()])
        .unwrap();

        let json = policy.to_json().unwrap();
        assert!(json.contains("\"notPrincipals\""));
        assert!(json.contains("\"ALLOW\""));

        let parsed = Policy::from_json(&json).unwrap();
        assert_eq!(parsed, policy);
    }
}
