// Job Repository Port (Interface)
//
// The job store is the only shared mutable resource. Every write that changes
// `status` is a compare-and-set: it names the state (and lease owner) it expects
// and reports `false` when the row no longer matches.

use crate::domain::{DeliveryAttempt, DeliveryStatus, Job, JobId, JobStatus, Message};
use crate::error::Result;
use async_trait::async_trait;

/// Terminal transition requested by the lease holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finish {
    /// `Succeeded` or `Failed`
    pub status: JobStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

impl Finish {
    pub fn succeeded(attempts: u32) -> Self {
        Self {
            status: JobStatus::Succeeded,
            attempts,
            error: None,
        }
    }

    pub fn failed(attempts: u32, error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            attempts,
            error: Some(error.into()),
        }
    }
}

/// Repository interface for Job persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job together with its initial messages
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID (messages included, in order)
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Current status only (cancellation check between rounds)
    async fn status_of(&self, id: &JobId) -> Result<Option<JobStatus>>;

    /// Atomically lease the oldest runnable QUEUED job (created_at, then id)
    /// and move it to RUNNING
    async fn lease_next(&self, owner: &str, lease_ms: i64) -> Result<Option<Job>>;

    /// Extend a RUNNING job's lease held by `owner`
    async fn renew_lease(&self, id: &JobId, owner: &str, lease_ms: i64) -> Result<bool>;

    /// Take over an expired lease of a RUNNING job from `stale_owner`
    async fn reclaim_expired(
        &self,
        id: &JobId,
        stale_owner: &str,
        owner: &str,
        lease_ms: i64,
    ) -> Result<bool>;

    /// Append messages to a RUNNING job leased by `owner`
    async fn append_messages(&self, id: &JobId, owner: &str, messages: &[Message])
        -> Result<bool>;

    /// RUNNING -> QUEUED (attempts + 1), releasing the lease
    async fn requeue(
        &self,
        id: &JobId,
        owner: &str,
        available_at: i64,
        error: &str,
    ) -> Result<bool>;

    /// RUNNING -> SUCCEEDED | FAILED; delivery becomes PENDING, lease is kept for delivery
    async fn finish(&self, id: &JobId, owner: &str, finish: &Finish) -> Result<bool>;

    /// QUEUED | RUNNING -> CANCELLED
    async fn cancel(&self, id: &JobId) -> Result<bool>;

    /// Claim (or renew) the right to deliver a PENDING result
    async fn claim_delivery(&self, id: &JobId, owner: &str, lease_ms: i64) -> Result<bool>;

    /// Append a delivery attempt; a duplicate sequence is a conflict
    async fn record_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<()>;

    /// Delivery attempts ordered by sequence
    async fn delivery_attempts(&self, id: &JobId) -> Result<Vec<DeliveryAttempt>>;

    /// PENDING -> DELIVERED | EXHAUSTED, releasing the delivery claim
    async fn settle_delivery(&self, id: &JobId, owner: &str, status: DeliveryStatus)
        -> Result<bool>;

    /// RUNNING jobs whose lease has expired (crash recovery)
    async fn find_expired_leases(&self) -> Result<Vec<Job>>;

    /// Terminal jobs with PENDING delivery and no live claim (crash recovery)
    async fn find_pending_deliveries(&self) -> Result<Vec<Job>>;

    /// Count jobs by status
    async fn count_by_status(&self, status: JobStatus) -> Result<i64>;
}

// ============================================================================
// In-memory implementation for testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct State {
        jobs: HashMap<JobId, Job>,
        attempts: HashMap<JobId, Vec<DeliveryAttempt>>,
    }

    /// Mutex-guarded job store; each call is one atomic step
    pub struct InMemoryJobRepository {
        state: Mutex<State>,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl InMemoryJobRepository {
        pub fn new(time_provider: Arc<dyn TimeProvider>) -> Self {
            Self {
                state: Mutex::new(State::default()),
                time_provider,
            }
        }

        pub fn job_count(&self) -> usize {
            self.lock().jobs.len()
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn leased_running<'a>(
            state: &'a mut State,
            id: &JobId,
            owner: &str,
        ) -> Option<&'a mut Job> {
            state.jobs.get_mut(id).filter(|j| {
                j.status == JobStatus::Running && j.lease_owner.as_deref() == Some(owner)
            })
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut state = self.lock();
            if state.jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
            }
            state.jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.lock().jobs.get(id).cloned())
        }

        async fn status_of(&self, id: &JobId) -> Result<Option<JobStatus>> {
            Ok(self.lock().jobs.get(id).map(|j| j.status))
        }

        async fn lease_next(&self, owner: &str, lease_ms: i64) -> Result<Option<Job>> {
            let now = self.time_provider.now_millis();
            let mut state = self.lock();

            let next_id = state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Queued && j.available_at <= now)
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
                .map(|j| j.id.clone());

            let Some(id) = next_id else {
                return Ok(None);
            };
            let job = state
                .jobs
                .get_mut(&id)
                .ok_or_else(|| AppError::Internal(format!("Job {} vanished", id)))?;
            job.start(owner, now, lease_ms)?;
            Ok(Some(job.clone()))
        }

        async fn renew_lease(&self, id: &JobId, owner: &str, lease_ms: i64) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut state = self.lock();
            match Self::leased_running(&mut state, id, owner) {
                Some(job) => {
                    job.lease_expires_at = Some(now + lease_ms);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn reclaim_expired(
            &self,
            id: &JobId,
            stale_owner: &str,
            owner: &str,
            lease_ms: i64,
        ) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut state = self.lock();
            match Self::leased_running(&mut state, id, stale_owner) {
                Some(job) if job.lease_expired(now) => {
                    job.lease_owner = Some(owner.to_string());
                    job.lease_expires_at = Some(now + lease_ms);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn append_messages(
            &self,
            id: &JobId,
            owner: &str,
            messages: &[Message],
        ) -> Result<bool> {
            let mut state = self.lock();
            match Self::leased_running(&mut state, id, owner) {
                Some(job) => {
                    job.messages.extend_from_slice(messages);
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn requeue(
            &self,
            id: &JobId,
            owner: &str,
            available_at: i64,
            error: &str,
        ) -> Result<bool> {
            let mut state = self.lock();
            match Self::leased_running(&mut state, id, owner) {
                Some(job) => {
                    job.requeue(available_at, error)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn finish(&self, id: &JobId, owner: &str, finish: &Finish) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut state = self.lock();
            let Some(job) = Self::leased_running(&mut state, id, owner) else {
                return Ok(false);
            };
            match finish.status {
                JobStatus::Succeeded => {
                    job.succeed(now)?;
                    job.attempts = finish.attempts;
                }
                JobStatus::Failed => job.fail(
                    now,
                    finish.attempts,
                    finish.error.clone().unwrap_or_default(),
                )?,
                other => {
                    return Err(AppError::InvalidState(format!(
                        "{} is not a finishing status",
                        other
                    )))
                }
            }
            Ok(true)
        }

        async fn cancel(&self, id: &JobId) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut state = self.lock();
            match state.jobs.get_mut(id) {
                Some(job) if job.status.can_transition_to(JobStatus::Cancelled) => {
                    job.cancel(now)?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn claim_delivery(&self, id: &JobId, owner: &str, lease_ms: i64) -> Result<bool> {
            let now = self.time_provider.now_millis();
            let mut state = self.lock();
            match state.jobs.get_mut(id) {
                Some(job)
                    if matches!(job.status, JobStatus::Succeeded | JobStatus::Failed)
                        && job.delivery_status == DeliveryStatus::Pending
                        && (job.lease_owner.as_deref() == Some(owner)
                            || job.lease_expired(now)) =>
                {
                    job.lease_owner = Some(owner.to_string());
                    job.lease_expires_at = Some(now + lease_ms);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn record_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<()> {
            let mut state = self.lock();
            if !state.jobs.contains_key(&attempt.job_id) {
                return Err(AppError::NotFound(format!("Job {} not found", attempt.job_id)));
            }
            let attempts = state.attempts.entry(attempt.job_id.clone()).or_default();
            if attempts.iter().any(|a| a.sequence == attempt.sequence) {
                return Err(AppError::Conflict(format!(
                    "Delivery attempt {} already recorded for job {}",
                    attempt.sequence, attempt.job_id
                )));
            }
            attempts.push(attempt.clone());
            attempts.sort_by_key(|a| a.sequence);
            Ok(())
        }

        async fn delivery_attempts(&self, id: &JobId) -> Result<Vec<DeliveryAttempt>> {
            Ok(self.lock().attempts.get(id).cloned().unwrap_or_default())
        }

        async fn settle_delivery(
            &self,
            id: &JobId,
            owner: &str,
            status: DeliveryStatus,
        ) -> Result<bool> {
            let mut state = self.lock();
            match state.jobs.get_mut(id) {
                Some(job)
                    if job.delivery_status == DeliveryStatus::Pending
                        && job.lease_owner.as_deref() == Some(owner) =>
                {
                    job.delivery_status = status;
                    job.release_lease();
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn find_expired_leases(&self) -> Result<Vec<Job>> {
            let now = self.time_provider.now_millis();
            let mut jobs: Vec<Job> = self
                .lock()
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Running && j.lease_expired(now))
                .cloned()
                .collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(jobs)
        }

        async fn find_pending_deliveries(&self) -> Result<Vec<Job>> {
            let now = self.time_provider.now_millis();
            let mut jobs: Vec<Job> = self
                .lock()
                .jobs
                .values()
                .filter(|j| {
                    matches!(j.status, JobStatus::Succeeded | JobStatus::Failed)
                        && j.delivery_status == DeliveryStatus::Pending
                        && j.lease_expired(now)
                })
                .cloned()
                .collect();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(jobs)
        }

        async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
            Ok(self
                .lock()
                .jobs
                .values()
                .filter(|j| j.status == status)
                .count() as i64)
        }
    }
}
