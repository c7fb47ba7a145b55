// Application Layer - Use Cases and Business Logic

pub mod delivery;
pub mod dispatcher;
pub mod engine;
pub mod maintenance;
pub mod recovery;
pub mod retry;

// Re-exports
pub use delivery::{DeliveryReport, DeliveryService};
pub use dispatcher::{MessageInput, SubmitRequest, TaskDispatcher};
pub use engine::{
    shutdown_channel, EngineConfig, ExecutionError, RunOutcome, ShutdownSender, ShutdownToken,
    Worker, WorkerPool, WorkerPoolHandle,
};
pub use maintenance::MaintenanceScheduler;
pub use recovery::{RecoveryReport, RecoveryService};
pub use retry::{DeliveryPolicy, RetryDecision, RetryPolicy};
