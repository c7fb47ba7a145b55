// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Unknown delivery outcome: {0}")]
    UnknownOutcome(String),

    #[error("Job {0} has not reached a deliverable state")]
    NotDeliverable(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
