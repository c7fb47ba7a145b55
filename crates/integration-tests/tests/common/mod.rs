//! Shared wiring: file-backed SQLite store, real HTTP webhook sender,
//! scripted model and static retrieval index.

#![allow(dead_code)]

use courier_core::application::{
    DeliveryPolicy, DeliveryService, EngineConfig, MessageInput, RetryPolicy, SubmitRequest,
    TaskDispatcher, Worker,
};
use courier_core::domain::{Job, JobId, Passage};
use courier_core::port::id_provider::UuidProvider;
use courier_core::port::time_provider::SystemTimeProvider;
use courier_core::port::{JobRepository, LanguageModel, RetrievalTool, TimeProvider};
use courier_infra_http::ReqwestWebhookSender;
use courier_infra_sqlite::{create_pool, run_migrations, SqliteJobRepository};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Temp database file removed (with its WAL side files) on drop
pub struct TempDb {
    path: PathBuf,
}

impl TempDb {
    pub fn new(name: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "courier-it-{}-{}-{}.db",
            name,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        Self { path }
    }

    pub fn url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let mut file = self.path.clone().into_os_string();
            file.push(suffix);
            std::fs::remove_file(file).ok();
        }
    }
}

pub async fn open_store(
    db: &TempDb,
    time: Arc<dyn TimeProvider>,
) -> (SqlitePool, Arc<dyn JobRepository>) {
    let pool = create_pool(&db.url()).await.unwrap();
    run_migrations(&pool).await.unwrap();
    let repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone(), time));
    (pool, repo)
}

/// Fast backoff so retry scenarios finish in milliseconds
pub fn fast_delivery_policy() -> DeliveryPolicy {
    DeliveryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        request_timeout: Duration::from_secs(2),
        claim_lease_ms: 30_000,
    }
}

pub fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        retry_base_delay_ms: 0,
        idle_poll: Duration::from_millis(5),
        ..EngineConfig::default()
    }
}

pub fn passages() -> Vec<Passage> {
    vec![
        Passage {
            passage_id: "kb-7".to_string(),
            text: "Refunds are processed within five business days".to_string(),
            score: 0.82,
        },
        Passage {
            passage_id: "kb-2".to_string(),
            text: "Orders ship from the Berlin warehouse".to_string(),
            score: 0.41,
        },
    ]
}

/// Everything one pipeline needs, wired over a single store
pub struct Pipeline {
    pub db: TempDb,
    pub pool: SqlitePool,
    pub repo: Arc<dyn JobRepository>,
    pub time: Arc<dyn TimeProvider>,
    pub dispatcher: TaskDispatcher,
    pub delivery: Arc<DeliveryService>,
    pub retry_policy: Arc<RetryPolicy>,
}

impl Pipeline {
    pub async fn new(name: &str, policy: DeliveryPolicy) -> Self {
        Self::with_clock(name, policy, Arc::new(SystemTimeProvider)).await
    }

    pub async fn with_clock(
        name: &str,
        policy: DeliveryPolicy,
        time: Arc<dyn TimeProvider>,
    ) -> Self {
        let db = TempDb::new(name);
        let (pool, repo) = open_store(&db, time.clone()).await;
        let sender = Arc::new(ReqwestWebhookSender::new(policy.request_timeout).unwrap());
        let delivery = Arc::new(DeliveryService::new(
            repo.clone(),
            sender,
            time.clone(),
            policy,
        ));
        let retry_policy = Arc::new(RetryPolicy::new(time.clone(), 0));
        let dispatcher =
            TaskDispatcher::new(repo.clone(), Arc::new(UuidProvider), time.clone(), 3);
        Self {
            db,
            pool,
            repo,
            time,
            dispatcher,
            delivery,
            retry_policy,
        }
    }

    pub fn worker(
        &self,
        id: &str,
        model: Arc<dyn LanguageModel>,
        retrieval: Arc<dyn RetrievalTool>,
    ) -> Worker {
        Worker::new(
            id,
            self.repo.clone(),
            model,
            retrieval,
            self.delivery.clone(),
            self.retry_policy.clone(),
            fast_engine_config(),
        )
    }

    pub async fn submit(&self, webhook_url: &str, text: &str) -> JobId {
        self.dispatcher
            .submit(SubmitRequest {
                user_id: "user-42".to_string(),
                agent_id: "support-agent".to_string(),
                conversation_id: "conv-9".to_string(),
                webhook_url: webhook_url.to_string(),
                messages: vec![MessageInput::new("user", text)],
            })
            .await
            .unwrap()
    }

    pub async fn load(&self, id: &JobId) -> Job {
        self.repo.find_by_id(id).await.unwrap().unwrap()
    }
}
