//! Core engine: policy model, evaluation, configuration, and storage seams

pub mod config;
pub mod iam;
pub mod service;

pub use config::EngineConfig;
