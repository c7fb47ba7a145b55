//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC params onto the dispatcher and maintenance port.

use crate::error::{throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    CancelResponse, DeliveriesResponse, JobIdRequest, JobView, MaintenanceRequest,
    MaintenanceResponse, StatsRequest, StatsResponse, SubmitResponse,
};
use courier_core::application::{SubmitRequest, TaskDispatcher};
use courier_core::domain::JobStatus;
use courier_core::error::AppError;
use courier_core::port::{Maintenance, MaintenanceConfig, MaintenancePlan};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use std::time::Instant;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    dispatcher: Arc<TaskDispatcher>,
    maintenance: Arc<dyn Maintenance>,
    maintenance_config: MaintenanceConfig,
    rate_limiter: RateLimiter,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        maintenance: Arc<dyn Maintenance>,
        maintenance_config: MaintenanceConfig,
        rate_limit_burst: u32,
        rate_limit_per_sec: u32,
    ) -> Self {
        Self {
            dispatcher,
            maintenance,
            maintenance_config,
            rate_limiter: RateLimiter::new(rate_limit_burst, rate_limit_per_sec),
            start_time: Instant::now(),
        }
    }

    fn admit(&self) -> Result<(), ErrorObjectOwned> {
        if self.rate_limiter.try_acquire() {
            Ok(())
        } else {
            Err(throttled())
        }
    }

    /// agent.submit.v1
    pub async fn submit(&self, params: SubmitRequest) -> Result<SubmitResponse, ErrorObjectOwned> {
        self.admit()?;
        let job_id = self.dispatcher.submit(params).await.map_err(to_rpc_error)?;
        Ok(SubmitResponse {
            job_id,
            status: JobStatus::Queued,
        })
    }

    /// agent.status.v1
    pub async fn status(&self, params: JobIdRequest) -> Result<JobView, ErrorObjectOwned> {
        let job = self
            .dispatcher
            .status(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(job.into())
    }

    /// agent.cancel.v1
    pub async fn cancel(&self, params: JobIdRequest) -> Result<CancelResponse, ErrorObjectOwned> {
        self.admit()?;
        self.dispatcher
            .cancel(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(CancelResponse {
            job_id: params.job_id,
            cancelled: true,
        })
    }

    /// agent.deliveries.v1
    pub async fn deliveries(
        &self,
        params: JobIdRequest,
    ) -> Result<DeliveriesResponse, ErrorObjectOwned> {
        let attempts = self
            .dispatcher
            .deliveries(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(DeliveriesResponse {
            job_id: params.job_id,
            attempts,
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> Result<StatsResponse, ErrorObjectOwned> {
        let stats = self.maintenance.get_stats().await.map_err(to_rpc_error)?;

        Ok(StatsResponse {
            total_jobs: stats.job_count,
            queued_jobs: stats.count(JobStatus::Queued),
            running_jobs: stats.count(JobStatus::Running),
            succeeded_jobs: stats.count(JobStatus::Succeeded),
            failed_jobs: stats.count(JobStatus::Failed),
            cancelled_jobs: stats.count(JobStatus::Cancelled),
            pending_deliveries: stats.pending_delivery_count,
            delivery_attempts: stats.delivery_attempt_count,
            db_size_bytes: stats.db_size_bytes,
            uptime_seconds: self.start_time.elapsed().as_secs() as i64,
        })
    }

    /// admin.maintenance.v1
    pub async fn maintenance(
        &self,
        params: MaintenanceRequest,
    ) -> Result<MaintenanceResponse, ErrorObjectOwned> {
        let mut plan = MaintenancePlan::from(&self.maintenance_config);
        plan.force_vacuum = params.force_vacuum;
        if let Some(days) = params.retention_days {
            if days < 0 {
                return Err(to_rpc_error(AppError::Validation(
                    "retention_days cannot be negative".to_string(),
                )));
            }
            plan.retention_days = days;
        }

        let report = self
            .maintenance
            .run_maintenance(&plan)
            .await
            .map_err(to_rpc_error)?;

        Ok(MaintenanceResponse {
            vacuum_run: report.vacuumed,
            jobs_deleted: report.jobs_deleted,
            db_size_before: report.before.db_size_bytes,
            db_size_after: report.after.db_size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use async_trait::async_trait;
    use courier_core::application::MessageInput;
    use courier_core::error::Result;
    use courier_core::port::id_provider::mocks::SequentialIdProvider;
    use courier_core::port::job_repository::mocks::InMemoryJobRepository;
    use courier_core::port::time_provider::mocks::ManualClock;
    use courier_core::port::MaintenanceStats;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeMaintenance {
        gc_retention: AtomicI64,
        vacuums: AtomicUsize,
    }

    #[async_trait]
    impl Maintenance for FakeMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            self.vacuums.fetch_add(1, Ordering::SeqCst);
            Ok(0.0)
        }

        async fn gc_finished_jobs(&self, retention_days: i64) -> Result<i64> {
            self.gc_retention.store(retention_days, Ordering::SeqCst);
            Ok(4)
        }

        async fn get_stats(&self) -> Result<MaintenanceStats> {
            let mut stats = MaintenanceStats {
                job_count: 3,
                db_size_bytes: 4096,
                ..Default::default()
            };
            stats.jobs_by_status.insert(JobStatus::Queued, 2);
            stats.jobs_by_status.insert(JobStatus::Failed, 1);
            Ok(stats)
        }
    }

    fn handler_with(burst: u32) -> (RpcHandler, Arc<FakeMaintenance>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let repo = Arc::new(InMemoryJobRepository::new(clock.clone()));
        let dispatcher = Arc::new(TaskDispatcher::new(
            repo,
            Arc::new(SequentialIdProvider::new("job")),
            clock,
            3,
        ));
        let maintenance = Arc::new(FakeMaintenance::default());
        let handler = RpcHandler::new(
            dispatcher,
            maintenance.clone(),
            MaintenanceConfig::default(),
            burst,
            1,
        );
        (handler, maintenance)
    }

    fn submit_request() -> SubmitRequest {
        SubmitRequest {
            user_id: "u1".to_string(),
            agent_id: "a1".to_string(),
            conversation_id: "c1".to_string(),
            webhook_url: "http://example.com/cb".to_string(),
            messages: vec![MessageInput::new("user", "hello")],
        }
    }

    #[tokio::test]
    async fn test_submit_then_status() {
        let (handler, _) = handler_with(10);

        let submitted = handler.submit(submit_request()).await.unwrap();
        assert_eq!(submitted.job_id, "job-1");
        assert_eq!(submitted.status, JobStatus::Queued);

        let view = handler
            .status(JobIdRequest {
                job_id: "job-1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(view.conversation_id, "c1");
        assert_eq!(view.status, JobStatus::Queued);
        assert_eq!(view.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_submit_is_validation_error() {
        let (handler, _) = handler_with(10);
        let mut req = submit_request();
        req.webhook_url = "not a url".to_string();

        let err = handler.submit(req).await.unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn test_cancel_twice_is_conflict() {
        let (handler, _) = handler_with(10);
        handler.submit(submit_request()).await.unwrap();
        let id = || JobIdRequest {
            job_id: "job-1".to_string(),
        };

        assert!(handler.cancel(id()).await.unwrap().cancelled);
        let err = handler.cancel(id()).await.unwrap_err();
        assert_eq!(err.code(), code::CONFLICT);

        let err = handler
            .deliveries(JobIdRequest {
                job_id: "nope".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_submit_is_throttled() {
        let (handler, _) = handler_with(2);
        handler.submit(submit_request()).await.unwrap();
        handler.submit(submit_request()).await.unwrap();

        let err = handler.submit(submit_request()).await.unwrap_err();
        assert_eq!(err.code(), code::THROTTLED);
    }

    #[tokio::test]
    async fn test_stats_and_maintenance() {
        let (handler, maintenance) = handler_with(10);

        let stats = handler.stats(StatsRequest::default()).await.unwrap();
        assert_eq!(stats.total_jobs, 3);
        assert_eq!(stats.queued_jobs, 2);
        assert_eq!(stats.failed_jobs, 1);
        assert_eq!(stats.succeeded_jobs, 0);

        let report = handler
            .maintenance(MaintenanceRequest::default())
            .await
            .unwrap();
        assert_eq!(report.jobs_deleted, 4);
        assert!(!report.vacuum_run);
        assert_eq!(maintenance.gc_retention.load(Ordering::SeqCst), 7);

        let report = handler
            .maintenance(MaintenanceRequest {
                force_vacuum: true,
                retention_days: Some(1),
            })
            .await
            .unwrap();
        assert!(report.vacuum_run);
        assert_eq!(maintenance.vacuums.load(Ordering::SeqCst), 1);
        assert_eq!(maintenance.gc_retention.load(Ordering::SeqCst), 1);

        let err = handler
            .maintenance(MaintenanceRequest {
                force_vacuum: false,
                retention_days: Some(-1),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_ERROR);
    }
}
