use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid statement for {key}: {reason}")]
    InvalidStatement { key: String, reason: String },

    #[error("Circular dependency that cannot be broken with stubs: {}", .resources.join(", "))]
    CircularDependency { resources: Vec<String> },

    #[error("Unresolved dependency: {statement} requires {dependency}, which is not created before it")]
    UnresolvedDependency { statement: String, dependency: String },

    #[error("Failed to rewrite reference to {reference} in {statement}: reference not found in expression")]
    RewriteFailed { statement: String, reference: String },

    #[error("Expression parse error: {0}")]
    ExpressionParseError(String),

    #[error("Migration verification failed:\n{0}")]
    VerificationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl PlanError {
    /// Shorthand for the transform-level shape errors.
    pub(crate) fn invalid(key: impl ToString, reason: impl Into<String>) -> Self {
        PlanError::InvalidStatement {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlanError>;
