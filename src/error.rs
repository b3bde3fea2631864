use crate::types::RuleId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RustAclError>;

#[derive(Error, Debug)]
pub enum RustAclError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed ACL rule: {0}")]
    Malformed(String),

    #[error("Duplicate ACL rule: an identical rule already exists with id {existing}")]
    Duplicate { existing: RuleId },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Refresh error: {0}")]
    Refresh(String),

    #[error("Read-only ACL store: {0}")]
    ReadOnly(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
