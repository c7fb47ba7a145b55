// Application error type shared by core and the adapter crates
//
// Adapters translate their own failures into these variants (sqlx errors
// become `Database`, `Conflict` or `NotFound` in infra-sqlite).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Rejected input; nothing was written
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Unique-key clash, e.g. a duplicate job id or delivery sequence
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation not allowed in the job's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Job store error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::application::engine::ExecutionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
