//! Crash recovery against the SQLite store
//!
//! A "crash" is simulated by leasing or finishing a job under an owner that
//! then disappears; the manual clock moves past its lease.

mod common;

use common::{fast_delivery_policy, Pipeline};
use courier_core::application::RecoveryService;
use courier_core::domain::{
    DeliveryAttempt, DeliveryOutcome, DeliveryStatus, JobStatus, Message,
};
use courier_core::port::language_model::mocks::ScriptedModel;
use courier_core::port::retrieval_tool::mocks::StaticRetrievalTool;
use courier_core::port::time_provider::mocks::ManualClock;
use courier_core::port::{Finish, JobRepository};
use courier_webhook_receiver::{spawn, Behavior};
use std::sync::Arc;

const START: i64 = 1_700_000_000_000;
const LEASE_MS: i64 = 30_000;

async fn pipeline(name: &str) -> (Pipeline, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let p = Pipeline::with_clock(name, fast_delivery_policy(), clock.clone()).await;
    (p, clock)
}

fn recovery(p: &Pipeline) -> RecoveryService {
    RecoveryService::new(
        "recovery-test",
        p.repo.clone(),
        p.delivery.clone(),
        p.retry_policy.clone(),
    )
    .with_lease_ms(LEASE_MS)
}

#[tokio::test]
async fn test_expired_run_is_requeued_and_completed_by_another_worker() {
    let (p, clock) = pipeline("requeue").await;
    let hook = spawn("127.0.0.1:0", Behavior::Accept).await.unwrap();
    let job_id = p.submit(&hook.url("/"), "hello").await;

    // Crashed worker: leased, never finished
    let leased = p.repo.lease_next("crashed-worker", LEASE_MS).await.unwrap().unwrap();
    assert_eq!(leased.id, job_id);

    // Live lease is left alone
    assert_eq!(recovery(&p).recover().await.unwrap().requeued, 0);

    clock.advance(LEASE_MS + 1);
    let report = recovery(&p).recover().await.unwrap();
    assert_eq!(report.requeued, 1);

    let job = p.load(&job_id).await;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempts, 1);
    assert!(job.lease_owner.is_none());
    assert!(job.last_error.as_deref().unwrap().contains("crashed-worker"));

    // The stale owner can no longer write
    assert!(!p
        .repo
        .append_messages(&job_id, "crashed-worker", &[Message::assistant("late")])
        .await
        .unwrap());

    let worker = p.worker(
        "worker-2",
        Arc::new(ScriptedModel::echo()),
        Arc::new(StaticRetrievalTool::new(Vec::new())),
    );
    assert!(worker.process_next_job().await.unwrap());

    let job = p.load(&job_id).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(job.messages.len(), 2);
    assert_eq!(hook.count(), 1);
}

#[tokio::test]
async fn test_expired_run_without_budget_fails_and_delivers_failure() {
    let (p, clock) = pipeline("fail-on-recovery").await;
    let hook = spawn("127.0.0.1:0", Behavior::Accept).await.unwrap();
    let job_id = p.submit(&hook.url("/"), "hello").await;

    // Spend two attempts, then crash on the last one
    for _ in 0..2 {
        p.repo.lease_next("crashed-worker", LEASE_MS).await.unwrap().unwrap();
        assert!(p
            .repo
            .requeue(&job_id, "crashed-worker", START, "model unavailable")
            .await
            .unwrap());
    }
    p.repo.lease_next("crashed-worker", LEASE_MS).await.unwrap().unwrap();
    clock.advance(LEASE_MS + 1);

    let report = recovery(&p).recover().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.requeued, 0);

    let job = p.load(&job_id).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.delivery_status, DeliveryStatus::Delivered);

    let received = hook.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body["status"], "failed");
}

#[tokio::test]
async fn test_stranded_delivery_resumes_at_next_sequence() {
    let (p, clock) = pipeline("redeliver").await;
    let hook = spawn("127.0.0.1:0", Behavior::Accept).await.unwrap();
    let job_id = p.submit(&hook.url("/"), "hello").await;

    // Crashed mid-delivery: finished, one rejected attempt recorded, claim still held
    p.repo.lease_next("crashed-worker", LEASE_MS).await.unwrap().unwrap();
    assert!(p
        .repo
        .append_messages(&job_id, "crashed-worker", &[Message::assistant("hi there")])
        .await
        .unwrap());
    assert!(p
        .repo
        .finish(&job_id, "crashed-worker", &Finish::succeeded(0))
        .await
        .unwrap());
    p.repo
        .record_delivery_attempt(&DeliveryAttempt {
            job_id: job_id.clone(),
            sequence: 1,
            timestamp: START,
            http_status: Some(502),
            outcome: DeliveryOutcome::Rejected,
            error: Some("Webhook rejected delivery with status 502".to_string()),
        })
        .await
        .unwrap();

    // Claim still live
    assert_eq!(recovery(&p).recover().await.unwrap().redelivered, 0);
    assert_eq!(hook.count(), 0);

    clock.advance(LEASE_MS + 1);
    let report = recovery(&p).recover().await.unwrap();
    assert_eq!(report.redelivered, 1);

    let received = hook.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].header("x-courier-delivery-attempt"), Some("2"));
    assert_eq!(received[0].body["messages"][1]["content"], "hi there");

    let attempts = p.repo.delivery_attempts(&job_id).await.unwrap();
    let sequences: Vec<u32> = attempts.iter().map(|a| a.sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
    assert_eq!(attempts[1].outcome, DeliveryOutcome::Accepted);

    let job = p.load(&job_id).await;
    assert_eq!(job.delivery_status, DeliveryStatus::Delivered);
    assert!(job.lease_owner.is_none());

    // Settled deliveries are not picked up again
    assert_eq!(recovery(&p).recover().await.unwrap(), Default::default());
}

#[tokio::test]
async fn test_accepted_but_unsettled_delivery_is_not_reposted() {
    let (p, clock) = pipeline("accepted-unsettled").await;
    let hook = spawn("127.0.0.1:0", Behavior::Accept).await.unwrap();
    let job_id = p.submit(&hook.url("/"), "hello").await;

    p.repo.lease_next("crashed-worker", LEASE_MS).await.unwrap().unwrap();
    p.repo
        .finish(&job_id, "crashed-worker", &Finish::succeeded(0))
        .await
        .unwrap();
    p.repo
        .record_delivery_attempt(&DeliveryAttempt {
            job_id: job_id.clone(),
            sequence: 1,
            timestamp: START,
            http_status: Some(200),
            outcome: DeliveryOutcome::Accepted,
            error: None,
        })
        .await
        .unwrap();

    clock.advance(LEASE_MS + 1);
    assert_eq!(recovery(&p).recover().await.unwrap().redelivered, 1);

    assert_eq!(hook.count(), 0);
    assert_eq!(p.load(&job_id).await.delivery_status, DeliveryStatus::Delivered);
    assert_eq!(p.repo.delivery_attempts(&job_id).await.unwrap().len(), 1);
}
