//! Error types for policy construction, loading, and service lookups
//!
//! Condition evaluation failures never surface here: they are recovered
//! inside the evaluator and treated as "condition not satisfied".

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthzError {
    #[error("Invalid statement field `{field}`: {reason}")]
    InvalidStatement { field: &'static str, reason: String },

    #[error("Invalid condition `{expression}`: {reason}")]
    InvalidCondition { expression: String, reason: String },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AuthzError>;
