pub mod clock;
mod lock;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreman_job::{
    HistoryRecord, NewHistoryRecord, NewQueueRecord, NewScheduleRecord, NewWorkerRecord,
    ParseEnumError, QueueRecord, ScheduleRecord, Signals, WorkerRecord, WorkerSignal,
    WorkerStatus, WorkingRecord, WorkingSignal,
};
use foreman_queue_filters::QueueNameFilters;
use thiserror::Error;

pub use lock::{lock_is_acquirable, LockTarget};
pub use memory::MemoryStore;

/// Errors surfaced by a `Store` implementation.
///
/// A lock that could not be acquired is not an error: `acquire_lock` returns `false`.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing storage failed (connection, query, transaction)
    #[error("Error occurred while querying the store: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A persisted value could not be decoded
    #[error("Invalid value read from the store: {0}")]
    InvalidValue(#[from] ParseEnumError),
}

impl StoreError {
    pub fn backend<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        StoreError::Backend(Box::new(error))
    }
}

pub type Result<T> = core::result::Result<T, StoreError>;

/// The persistent store every worker, scheduler and machine coordinates through.
///
/// Each method is one short atomic operation. Implementations must make
/// `claim_queued`, `complete_working`, `take_signals`,
/// `create_queued_and_history_for_schedule` and the lock methods atomic with
/// respect to concurrent callers in other processes.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Sets the lock of `target` iff it is unlocked or its lock timestamp is at or
    /// before `force_if_older_than`. Returns whether the caller now holds the lock.
    async fn acquire_lock(
        &self,
        target: LockTarget,
        force_if_older_than: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clears the lock of `target` if it is set.
    async fn release_lock(&self, target: LockTarget) -> Result<()>;

    async fn enqueue(&self, record: NewQueueRecord) -> Result<QueueRecord>;

    /// Earliest queued record of the application matching `filters` and queued at or before `queued_before`.
    async fn get_queued(
        &self,
        application_name: &str,
        filters: &QueueNameFilters,
        queued_before: DateTime<Utc>,
    ) -> Result<Option<QueueRecord>>;

    async fn get_all_queued(&self, application_name: &str) -> Result<Vec<QueueRecord>>;

    /// Atomically deletes the record `get_queued` would return and inserts the
    /// working record owned by `worker_id` in its place.
    async fn claim_queued(
        &self,
        application_name: &str,
        worker_id: i64,
        filters: &QueueNameFilters,
        queued_before: DateTime<Utc>,
    ) -> Result<Option<WorkingRecord>>;

    async fn get_working(&self, id: i64) -> Result<Option<WorkingRecord>>;

    async fn get_working_for_worker(&self, worker_id: i64) -> Result<Vec<WorkingRecord>>;

    /// Atomically deletes working record `working_id`, inserts `history` and, if
    /// given, the `retry` queue record. Returns `None` without writing anything
    /// when the working record no longer exists.
    async fn complete_working(
        &self,
        working_id: i64,
        history: NewHistoryRecord,
        retry: Option<NewQueueRecord>,
    ) -> Result<Option<HistoryRecord>>;

    async fn get_history(&self, application_name: &str) -> Result<Vec<HistoryRecord>>;

    /// Reads and clears the pending signals of `worker_id` and, when it belongs
    /// to that worker, of working record `working_id`. `None` means the worker
    /// record does not exist.
    async fn take_signals(&self, worker_id: i64, working_id: Option<i64>)
        -> Result<Option<Signals>>;

    async fn set_worker_signal(&self, worker_id: i64, signal: WorkerSignal) -> Result<bool>;

    async fn set_working_signal(&self, working_id: i64, signal: WorkingSignal) -> Result<bool>;

    /// Schedules of the application with their jobs ordered by number.
    async fn get_schedules(&self, application_name: &str) -> Result<Vec<ScheduleRecord>>;

    async fn create_schedule(&self, schedule: NewScheduleRecord) -> Result<ScheduleRecord>;

    async fn delete_schedule(&self, id: i64) -> Result<bool>;

    /// Whether any queue, working or history row exists for the occurrence `date` of `schedule_id`.
    async fn schedule_date_exists(&self, schedule_id: i64, date: DateTime<Utc>) -> Result<bool>;

    /// Inserts every row of one schedule occurrence in a single batch.
    async fn create_queued_and_history_for_schedule(
        &self,
        schedule_id: i64,
        date: DateTime<Utc>,
        queued: Vec<NewQueueRecord>,
        history: Vec<NewHistoryRecord>,
    ) -> Result<()>;

    async fn get_workers(
        &self,
        application_name: &str,
        machine_address: &str,
        machine_name: &str,
    ) -> Result<Vec<WorkerRecord>>;

    async fn get_worker(&self, id: i64) -> Result<Option<WorkerRecord>>;

    async fn create_worker(&self, worker: NewWorkerRecord) -> Result<WorkerRecord>;

    async fn update_worker_queue_names(&self, id: i64, queue_names: &str) -> Result<bool>;

    async fn update_worker_status(&self, id: i64, status: WorkerStatus) -> Result<bool>;

    async fn delete_worker(&self, id: i64) -> Result<bool>;
}
