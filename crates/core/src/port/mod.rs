// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod language_model;
pub mod maintenance;
pub mod retrieval_tool;
pub mod time_provider;
pub mod webhook_sender;

// Re-exports
pub use id_provider::IdProvider;
pub use job_repository::{Finish, JobRepository};
pub use language_model::{LanguageModel, ModelError, ModelRequest, ModelTurn};
pub use maintenance::{
    Maintenance, MaintenanceConfig, MaintenancePlan, MaintenanceReport, MaintenanceStats,
};
pub use retrieval_tool::{RetrievalError, RetrievalTool};
pub use time_provider::TimeProvider;
pub use webhook_sender::{DeliveryError, WebhookRequest, WebhookResponse, WebhookSender};
