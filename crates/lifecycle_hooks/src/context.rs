use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use foreman_job::{HistoryStatus, WorkingRecord};

#[derive(Debug, Clone)]
pub struct WorkerStartContext {
    pub worker_id: i64,
    pub worker_name: String,
    pub queue_names: String,
}

#[derive(Debug, Clone)]
pub struct WorkerStopContext {
    pub worker_id: i64,
    pub worker_name: String,
    /// Whether the in-flight job was aborted rather than awaited
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct JobStartContext {
    pub worker_id: i64,
    pub job: Arc<WorkingRecord>,
}

#[derive(Debug, Clone)]
pub struct JobCompleteContext {
    pub worker_id: i64,
    pub job: Arc<WorkingRecord>,
    pub status: HistoryStatus,
    pub exception: Option<String>,
    pub duration: Duration,
    /// A new attempt was queued
    pub retried: bool,
}

#[derive(Debug, Clone)]
pub struct ScheduleEnqueuedContext {
    pub schedule_id: i64,
    pub schedule_name: String,
    pub date: DateTime<Utc>,
    pub queued: usize,
    /// Job definitions that could not be deserialized and went straight to history
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct MachineReconcileContext {
    pub machine_address: String,
    pub machine_name: String,
    pub started: Vec<i64>,
    pub disposed: Vec<i64>,
    pub workers: usize,
}
