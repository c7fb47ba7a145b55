// Domain Layer - Pure business logic and entities

pub mod delivery;
pub mod error;
pub mod job;
pub mod retrieval;

// Re-exports
pub use delivery::{DeliveryAttempt, DeliveryOutcome, PayloadStatus, WebhookPayload};
pub use error::DomainError;
pub use job::{DeliveryStatus, Job, JobId, JobStatus, Message, Role};
pub use retrieval::{Passage, RetrievalResult};
