//! Lease exclusivity under concurrent workers on a shared SQLite file

mod common;

use common::{fast_delivery_policy, open_store, passages, Pipeline, TempDb};
use courier_core::application::{shutdown_channel, WorkerPool};
use courier_core::domain::{DeliveryStatus, Job, JobStatus, Message};
use courier_core::port::language_model::mocks::ScriptedModel;
use courier_core::port::retrieval_tool::mocks::StaticRetrievalTool;
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::JobRepository;
use courier_webhook_receiver::{spawn, Behavior};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const LEASE_MS: i64 = 30_000;

/// Lease until the queue is drained from `leasers` concurrent tasks; returns (owner, job id) pairs
async fn drain_concurrently(jobs: usize, leasers: usize) -> Vec<(String, String)> {
    let db = TempDb::new("lease");
    let (_pool, repo) = open_store(&db, Arc::new(SystemTimeProvider)).await;

    for i in 0..jobs {
        let mut job = Job::new_test(format!("conv-{}", i), vec![Message::user("hi")]);
        job.created_at = i as i64;
        job.available_at = 0;
        repo.insert(&job).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..leasers {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            let owner = format!("worker-{}", w);
            let mut leased = Vec::new();
            while let Some(job) = repo.lease_next(&owner, LEASE_MS).await.unwrap() {
                assert_eq!(job.status, JobStatus::Running);
                assert_eq!(job.lease_owner.as_deref(), Some(owner.as_str()));
                leased.push((owner.clone(), job.id));
            }
            leased
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_leasing_hands_out_each_job_once() {
    let leased = drain_concurrently(40, 8).await;

    assert_eq!(leased.len(), 40);
    let unique: HashSet<&String> = leased.iter().map(|(_, id)| id).collect();
    assert_eq!(unique.len(), 40, "a job was leased twice");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_no_job_is_leased_twice(jobs in 1usize..25, leasers in 1usize..6) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let leased = runtime.block_on(drain_concurrently(jobs, leasers));

        let unique: HashSet<&String> = leased.iter().map(|(_, id)| id).collect();
        prop_assert_eq!(leased.len(), jobs);
        prop_assert_eq!(unique.len(), jobs);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_pool_delivers_every_job_exactly_once() {
    let p = Pipeline::new("pool", fast_delivery_policy()).await;
    let hook = spawn("127.0.0.1:0", Behavior::Accept).await.unwrap();

    let mut job_ids = Vec::new();
    for i in 0..20 {
        job_ids.push(p.submit(&hook.url("/"), &format!("question {}", i)).await);
    }

    let retrieval = Arc::new(StaticRetrievalTool::new(passages()));
    let workers = (0..4)
        .map(|i| {
            p.worker(
                &format!("worker-{}", i),
                Arc::new(ScriptedModel::echo()),
                retrieval.clone(),
            )
        })
        .collect();

    let (tx, token) = shutdown_channel();
    let handle = WorkerPool::new(workers).spawn(token);

    tokio::time::timeout(Duration::from_secs(10), async {
        while hook.count() < job_ids.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("every job delivered");

    tx.shutdown();
    handle.join().await;

    let delivered: Vec<String> = hook
        .received()
        .into_iter()
        .map(|r| r.body["jobId"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(delivered.len(), job_ids.len());
    let unique: HashSet<&String> = delivered.iter().collect();
    assert_eq!(unique.len(), job_ids.len());

    for id in &job_ids {
        let job = p.load(id).await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.delivery_status, DeliveryStatus::Delivered);
        assert_eq!(job.messages.len(), 2);
    }
}
