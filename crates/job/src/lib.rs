mod status;

use chrono::{DateTime, Utc};
use derive_builder::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};

pub use status::{
    HistoryStatus, ParseEnumError, ScheduleRepeatType, WorkerSignal, WorkerStartupType,
    WorkerStatus, WorkingSignal,
};

/// Queue name used when a job is enqueued without one.
pub const DEFAULT_QUEUE_NAME: &str = "default";

/// `QueueRecord` is a job waiting to be claimed by a worker.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct QueueRecord {
    pub id: i64,
    pub application_name: String,
    pub queue_name: String,
    /// Display name of the job
    pub job_name: String,
    /// Identifier the job registry resolves to a job type
    pub job_type: String,
    /// Serialized job data
    pub data: String,
    pub queued_on: DateTime<Utc>,
    /// 1-based attempt counter
    pub try_number: i32,
    /// Set when the record was produced by a schedule occurrence
    pub schedule_id: Option<i64>,
    pub locked: bool,
    pub lock_updated_on: Option<DateTime<Utc>>,
}

/// `WorkingRecord` is a job currently owned by exactly one worker.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct WorkingRecord {
    pub id: i64,
    pub application_name: String,
    pub worker_id: i64,
    pub queue_name: String,
    pub job_name: String,
    pub job_type: String,
    pub data: String,
    pub queued_on: DateTime<Utc>,
    pub try_number: i32,
    pub started_on: DateTime<Utc>,
    /// Pending cancellation request from the control plane
    pub signal: WorkingSignal,
    pub schedule_id: Option<i64>,
    pub locked: bool,
    pub lock_updated_on: Option<DateTime<Utc>>,
}

impl WorkingRecord {
    /// Builds the working record that replaces `queued` once `worker_id` claimed it.
    pub fn from_queued(
        id: i64,
        queued: &QueueRecord,
        worker_id: i64,
        started_on: DateTime<Utc>,
    ) -> Self {
        WorkingRecord {
            id,
            application_name: queued.application_name.clone(),
            worker_id,
            queue_name: queued.queue_name.clone(),
            job_name: queued.job_name.clone(),
            job_type: queued.job_type.clone(),
            data: queued.data.clone(),
            queued_on: queued.queued_on,
            try_number: queued.try_number,
            started_on,
            signal: WorkingSignal::None,
            schedule_id: queued.schedule_id,
            locked: false,
            lock_updated_on: None,
        }
    }
}

/// `HistoryRecord` is the immutable outcome of one execution attempt.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct HistoryRecord {
    pub id: i64,
    pub application_name: String,
    pub worker_id: Option<i64>,
    pub queue_name: String,
    pub job_name: String,
    pub job_type: String,
    pub data: String,
    pub queued_on: DateTime<Utc>,
    pub try_number: i32,
    pub started_on: DateTime<Utc>,
    pub finished_on: DateTime<Utc>,
    pub status: HistoryStatus,
    /// Captured error, if the attempt did not succeed
    pub exception: Option<String>,
    pub schedule_id: Option<i64>,
}

/// `ScheduledJobRecord` is one job definition attached to a schedule.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct ScheduledJobRecord {
    pub id: i64,
    pub schedule_id: i64,
    pub job_type: String,
    /// JSON property bag deserialized into the job before it is enqueued
    pub data: String,
    /// Ordinal position within the schedule
    pub number: i32,
}

/// `ScheduleRecord` is a recurring definition producing queue records on each occurrence.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct ScheduleRecord {
    pub id: i64,
    pub application_name: String,
    pub queue_name: String,
    pub name: String,
    pub start_on: DateTime<Utc>,
    pub end_on: Option<DateTime<Utc>>,
    pub repeat_type: ScheduleRepeatType,
    pub repeat_value: i64,
    pub enabled: bool,
    /// Lock flag held while an actor enqueues this schedule's occurrence
    pub enqueueing: bool,
    pub enqueueing_updated_on: Option<DateTime<Utc>>,
    /// Ordered by `number`
    pub scheduled_jobs: Vec<ScheduledJobRecord>,
}

impl ScheduleRecord {
    /// Length of one repeat interval in seconds, `0` when the schedule does not repeat.
    ///
    /// `None` when the interval does not fit an `i64`.
    pub fn repeat_seconds(&self) -> Option<i64> {
        self.repeat_type.unit_seconds().checked_mul(self.repeat_value)
    }
}

/// `WorkerRecord` is a worker registered for a machine.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[getset(get = "pub")]
pub struct WorkerRecord {
    pub id: i64,
    pub application_name: String,
    pub name: String,
    pub machine_address: String,
    pub machine_name: String,
    /// Queue name filter string, see `foreman_queue_filters`
    pub queue_names: String,
    pub status: WorkerStatus,
    pub signal: WorkerSignal,
    pub startup: WorkerStartupType,
    pub updated_on: DateTime<Utc>,
    pub locked: bool,
    pub lock_updated_on: Option<DateTime<Utc>>,
}

/// Pending control signals for a worker and its in-flight job, as read (and cleared) by the worker.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Default)]
#[getset(get = "pub")]
pub struct Signals {
    pub worker_name: String,
    pub queue_names: String,
    pub worker_signal: WorkerSignal,
    pub working_id: Option<i64>,
    pub working_signal: WorkingSignal,
}

/// Insert shape of a `QueueRecord`.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct NewQueueRecord {
    #[builder(setter(into))]
    pub application_name: String,
    #[builder(default = "DEFAULT_QUEUE_NAME.to_string()", setter(into))]
    pub queue_name: String,
    #[builder(default, setter(into))]
    pub job_name: String,
    #[builder(setter(into))]
    pub job_type: String,
    #[builder(default = "String::from(\"{}\")", setter(into))]
    pub data: String,
    #[builder(default = "Utc::now()")]
    pub queued_on: DateTime<Utc>,
    #[builder(default = "1")]
    pub try_number: i32,
    #[builder(default, setter(strip_option))]
    pub schedule_id: Option<i64>,
}

impl NewQueueRecord {
    pub fn builder() -> NewQueueRecordBuilder {
        NewQueueRecordBuilder::default()
    }

    /// Next attempt of a job whose `working` attempt ended in a retryable outcome.
    pub fn retry_of(working: &WorkingRecord, queued_on: DateTime<Utc>) -> Self {
        NewQueueRecord {
            application_name: working.application_name.clone(),
            queue_name: working.queue_name.clone(),
            job_name: working.job_name.clone(),
            job_type: working.job_type.clone(),
            data: working.data.clone(),
            queued_on,
            try_number: working.try_number + 1,
            schedule_id: working.schedule_id,
        }
    }
}

impl NewQueueRecordBuilder {
    /// Builds the record.
    ///
    /// # Panics
    /// Panics if `application_name` or `job_type` was not set.
    pub fn build(self) -> NewQueueRecord {
        self.build_internal()
            .expect("application_name and job_type are required to build a NewQueueRecord")
    }
}

/// Insert shape of a `HistoryRecord`.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct NewHistoryRecord {
    pub application_name: String,
    pub worker_id: Option<i64>,
    pub queue_name: String,
    pub job_name: String,
    pub job_type: String,
    pub data: String,
    pub queued_on: DateTime<Utc>,
    pub try_number: i32,
    pub started_on: DateTime<Utc>,
    pub finished_on: DateTime<Utc>,
    pub status: HistoryStatus,
    pub exception: Option<String>,
    pub schedule_id: Option<i64>,
}

impl NewHistoryRecord {
    /// Outcome of the attempt tracked by `working`.
    pub fn from_working(
        working: &WorkingRecord,
        status: HistoryStatus,
        finished_on: DateTime<Utc>,
        exception: Option<String>,
    ) -> Self {
        NewHistoryRecord {
            application_name: working.application_name.clone(),
            worker_id: Some(working.worker_id),
            queue_name: working.queue_name.clone(),
            job_name: working.job_name.clone(),
            job_type: working.job_type.clone(),
            data: working.data.clone(),
            queued_on: working.queued_on,
            try_number: working.try_number,
            started_on: working.started_on,
            finished_on,
            status,
            exception,
            schedule_id: working.schedule_id,
        }
    }

    /// A job that never reached a worker, e.g. a scheduled job whose type could not be loaded.
    pub fn failed_before_queue(
        queued: &NewQueueRecord,
        worker_id: Option<i64>,
        at: DateTime<Utc>,
        exception: String,
    ) -> Self {
        NewHistoryRecord {
            application_name: queued.application_name.clone(),
            worker_id,
            queue_name: queued.queue_name.clone(),
            job_name: queued.job_name.clone(),
            job_type: queued.job_type.clone(),
            data: queued.data.clone(),
            queued_on: queued.queued_on,
            try_number: queued.try_number,
            started_on: at,
            finished_on: at,
            status: HistoryStatus::Failed,
            exception: Some(exception),
            schedule_id: queued.schedule_id,
        }
    }

    pub fn into_record(self, id: i64) -> HistoryRecord {
        HistoryRecord {
            id,
            application_name: self.application_name,
            worker_id: self.worker_id,
            queue_name: self.queue_name,
            job_name: self.job_name,
            job_type: self.job_type,
            data: self.data,
            queued_on: self.queued_on,
            try_number: self.try_number,
            started_on: self.started_on,
            finished_on: self.finished_on,
            status: self.status,
            exception: self.exception,
            schedule_id: self.schedule_id,
        }
    }
}

/// Insert shape of a `WorkerRecord`.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct NewWorkerRecord {
    #[builder(setter(into))]
    pub application_name: String,
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(into))]
    pub machine_address: String,
    #[builder(setter(into))]
    pub machine_name: String,
    #[builder(default = "String::from(\"*\")", setter(into))]
    pub queue_names: String,
    #[builder(default)]
    pub status: WorkerStatus,
    #[builder(default)]
    pub startup: WorkerStartupType,
}

impl NewWorkerRecord {
    pub fn builder() -> NewWorkerRecordBuilder {
        NewWorkerRecordBuilder::default()
    }
}

impl NewWorkerRecordBuilder {
    /// Builds the record.
    ///
    /// # Panics
    /// Panics if the application name, worker name or machine identity was not set.
    pub fn build(self) -> NewWorkerRecord {
        self.build_internal()
            .expect("application, name and machine identity are required to build a NewWorkerRecord")
    }
}

/// Insert shape of a `ScheduledJobRecord`.
#[derive(Getters, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct NewScheduledJobRecord {
    pub job_type: String,
    pub data: String,
}

/// Insert shape of a `ScheduleRecord` together with its jobs, in order.
#[derive(Getters, Debug, Clone, PartialEq, Eq, Builder)]
#[getset(get = "pub")]
#[builder(build_fn(private, name = "build_internal"), pattern = "owned")]
pub struct NewScheduleRecord {
    #[builder(setter(into))]
    pub application_name: String,
    #[builder(default = "DEFAULT_QUEUE_NAME.to_string()", setter(into))]
    pub queue_name: String,
    #[builder(setter(into))]
    pub name: String,
    pub start_on: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub end_on: Option<DateTime<Utc>>,
    #[builder(default)]
    pub repeat_type: ScheduleRepeatType,
    #[builder(default)]
    pub repeat_value: i64,
    #[builder(default = "true")]
    pub enabled: bool,
    #[builder(default, setter(each(name = "job")))]
    pub jobs: Vec<NewScheduledJobRecord>,
}

impl NewScheduleRecord {
    pub fn builder() -> NewScheduleRecordBuilder {
        NewScheduleRecordBuilder::default()
    }
}

impl NewScheduleRecordBuilder {
    /// Builds the record.
    ///
    /// # Panics
    /// Panics if the application name, schedule name or start date was not set.
    pub fn build(self) -> NewScheduleRecord {
        self.build_internal()
            .expect("application, name and start_on are required to build a NewScheduleRecord")
    }
}
