// Periodic job store maintenance: retention GC, then VACUUM when needed

use crate::application::engine::ShutdownToken;
use crate::error::Result;
use crate::port::{Maintenance, MaintenanceConfig, MaintenancePlan, MaintenanceReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};

pub struct MaintenanceScheduler {
    maintenance: Arc<dyn Maintenance>,
    plan: MaintenancePlan,
    period: Duration,
}

impl MaintenanceScheduler {
    /// `interval_hours` is clamped to at least one hour
    pub fn new(
        maintenance: Arc<dyn Maintenance>,
        config: MaintenanceConfig,
        interval_hours: u64,
    ) -> Self {
        Self {
            maintenance,
            plan: MaintenancePlan::from(&config),
            period: Duration::from_secs(interval_hours.max(1) * 3600),
        }
    }

    /// First pass runs immediately, then once per period until shutdown
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(
            period_secs = self.period.as_secs(),
            retention_days = self.plan.retention_days,
            "Maintenance scheduler started"
        );

        let mut tick = interval(self.period);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        error!(error = %e, "Scheduled maintenance failed");
                    }
                }
                _ = shutdown.wait() => {
                    info!("Maintenance scheduler stopped");
                    break;
                }
            }
        }
    }

    pub async fn run_now(&self) -> Result<MaintenanceReport> {
        let report = self.maintenance.run_maintenance(&self.plan).await?;
        info!(
            jobs_deleted = report.jobs_deleted,
            vacuumed = report.vacuumed,
            job_count = report.after.job_count,
            pending_deliveries = report.after.pending_delivery_count,
            "Maintenance run finished"
        );
        Ok(report)
    }
}
