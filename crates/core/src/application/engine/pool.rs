// Worker pool: N workers sharing one job store

use super::shutdown::ShutdownToken;
use super::Worker;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    pub fn new(workers: Vec<Worker>) -> Self {
        Self {
            workers: workers.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Start every worker on its own task
    pub fn spawn(self, shutdown: ShutdownToken) -> WorkerPoolHandle {
        info!(workers = self.workers.len(), "Starting worker pool");
        let handles = self
            .workers
            .into_iter()
            .map(|worker| {
                let token = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = worker.run(token).await {
                        error!(worker_id = %worker.id(), error = %e, "Worker exited with error");
                    }
                })
            })
            .collect();
        WorkerPoolHandle { handles }
    }
}

pub struct WorkerPoolHandle {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPoolHandle {
    /// Wait for every worker to stop
    pub async fn join(self) {
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}
