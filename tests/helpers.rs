#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use foreman::{
    HistoryRecord, IntoJobResult, JobContext, JobHandler, JobRegistry, MemoryStore,
    NewWorkerRecord, Store, Worker, WorkerParams, WorkerRecord, WorkerStatus,
};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub const APP: &str = "app";
pub const MACHINE_ADDRESS: &str = "10.0.0.1";
pub const MACHINE_NAME: &str = "host-1";
pub const HEARTBEAT: Duration = Duration::from_millis(40);
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize, Deserialize)]
pub struct Succeed {
    pub value: i32,
}

impl JobHandler for Succeed {
    const JOB_TYPE: &'static str = "succeed";

    async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {}
}

#[derive(Serialize, Deserialize)]
pub struct Fail {
    pub message: String,
}

impl JobHandler for Fail {
    const JOB_TYPE: &'static str = "fail";

    fn retries(&self) -> i32 {
        2
    }

    async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
        Err::<(), _>(self.message)
    }
}

#[derive(Serialize, Deserialize)]
pub struct Sleep {
    pub ms: u64,
    pub timeout_ms: i64,
    pub retries: i32,
}

impl JobHandler for Sleep {
    const JOB_TYPE: &'static str = "sleep";

    fn retries(&self) -> i32 {
        self.retries
    }

    fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
        tokio::time::sleep(Duration::from_millis(self.ms)).await;
    }
}

pub fn registry() -> Arc<JobRegistry> {
    Arc::new(
        JobRegistry::new()
            .register::<Succeed>()
            .register::<Fail>()
            .register::<Sleep>(),
    )
}

pub async fn enable_logs() {
    static ONCE: OnceCell<()> = OnceCell::const_new();

    ONCE.get_or_init(|| async {
        let fmt_layer = tracing_subscriber::fmt::layer();
        let filter_layer = EnvFilter::try_new("debug").unwrap();

        tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt_layer)
            .init();
    })
    .await;
}

pub async fn create_worker_record(store: &Arc<MemoryStore>, queue_names: &str) -> WorkerRecord {
    store
        .create_worker(
            NewWorkerRecord::builder()
                .application_name(APP)
                .name("worker")
                .machine_address(MACHINE_ADDRESS)
                .machine_name(MACHINE_NAME)
                .queue_names(queue_names)
                .build(),
        )
        .await
        .expect("Failed to create worker record")
}

/// A stopped worker polling every few milliseconds, without scheduler.
pub fn new_worker(store: &Arc<MemoryStore>, record: WorkerRecord) -> Worker {
    Worker::new(
        WorkerParams::new(record, store.clone(), registry())
            .heartbeat(HEARTBEAT)
            .scheduler_enabled(false),
    )
}

/// Polls the history until it holds at least `count` records.
pub async fn wait_for_history(store: &MemoryStore, count: usize) -> Vec<HistoryRecord> {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let history = store.get_history(APP).await.expect("Failed to read history");
        if history.len() >= count {
            return history;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Expected {count} history records, found {}", history.len());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_status(worker: &Worker, status: WorkerStatus) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while worker.status().await != status {
        if tokio::time::Instant::now() > deadline {
            panic!("Worker never reached status {status}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_in_flight(worker: &Worker) -> Arc<foreman::WorkingRecord> {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        if let Some(working) = worker.in_flight() {
            return working;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("Worker never picked up a job");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
