use chrono::{DateTime, Utc};
use foreman_job::{
    HistoryRecord, ParseEnumError, QueueRecord, ScheduleRecord, ScheduledJobRecord, WorkerRecord,
    WorkingRecord,
};
use sqlx::FromRow;

#[derive(FromRow, Debug)]
pub(crate) struct QueueRow {
    id: i64,
    application_name: String,
    queue_name: String,
    job_name: String,
    job_type: String,
    data: String,
    queued_on: DateTime<Utc>,
    try_number: i32,
    schedule_id: Option<i64>,
    locked: bool,
    lock_updated_on: Option<DateTime<Utc>>,
}

impl From<QueueRow> for QueueRecord {
    fn from(row: QueueRow) -> Self {
        QueueRecord {
            id: row.id,
            application_name: row.application_name,
            queue_name: row.queue_name,
            job_name: row.job_name,
            job_type: row.job_type,
            data: row.data,
            queued_on: row.queued_on,
            try_number: row.try_number,
            schedule_id: row.schedule_id,
            locked: row.locked,
            lock_updated_on: row.lock_updated_on,
        }
    }
}

#[derive(FromRow, Debug)]
pub(crate) struct WorkingRow {
    id: i64,
    application_name: String,
    worker_id: i64,
    queue_name: String,
    job_name: String,
    job_type: String,
    data: String,
    queued_on: DateTime<Utc>,
    try_number: i32,
    started_on: DateTime<Utc>,
    signal: String,
    schedule_id: Option<i64>,
    locked: bool,
    lock_updated_on: Option<DateTime<Utc>>,
}

impl TryFrom<WorkingRow> for WorkingRecord {
    type Error = ParseEnumError;

    fn try_from(row: WorkingRow) -> Result<Self, Self::Error> {
        Ok(WorkingRecord {
            id: row.id,
            application_name: row.application_name,
            worker_id: row.worker_id,
            queue_name: row.queue_name,
            job_name: row.job_name,
            job_type: row.job_type,
            data: row.data,
            queued_on: row.queued_on,
            try_number: row.try_number,
            started_on: row.started_on,
            signal: row.signal.parse()?,
            schedule_id: row.schedule_id,
            locked: row.locked,
            lock_updated_on: row.lock_updated_on,
        })
    }
}

#[derive(FromRow, Debug)]
pub(crate) struct HistoryRow {
    id: i64,
    application_name: String,
    worker_id: Option<i64>,
    queue_name: String,
    job_name: String,
    job_type: String,
    data: String,
    queued_on: DateTime<Utc>,
    try_number: i32,
    started_on: DateTime<Utc>,
    finished_on: DateTime<Utc>,
    status: String,
    exception: Option<String>,
    schedule_id: Option<i64>,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = ParseEnumError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(HistoryRecord {
            id: row.id,
            application_name: row.application_name,
            worker_id: row.worker_id,
            queue_name: row.queue_name,
            job_name: row.job_name,
            job_type: row.job_type,
            data: row.data,
            queued_on: row.queued_on,
            try_number: row.try_number,
            started_on: row.started_on,
            finished_on: row.finished_on,
            status: row.status.parse()?,
            exception: row.exception,
            schedule_id: row.schedule_id,
        })
    }
}

#[derive(FromRow, Debug)]
pub(crate) struct ScheduledJobRow {
    id: i64,
    pub(crate) schedule_id: i64,
    job_type: String,
    data: String,
    number: i32,
}

impl From<ScheduledJobRow> for ScheduledJobRecord {
    fn from(row: ScheduledJobRow) -> Self {
        ScheduledJobRecord {
            id: row.id,
            schedule_id: row.schedule_id,
            job_type: row.job_type,
            data: row.data,
            number: row.number,
        }
    }
}

#[derive(FromRow, Debug)]
pub(crate) struct ScheduleRow {
    pub(crate) id: i64,
    application_name: String,
    queue_name: String,
    name: String,
    start_on: DateTime<Utc>,
    end_on: Option<DateTime<Utc>>,
    repeat_type: String,
    repeat_value: i64,
    enabled: bool,
    enqueueing: bool,
    enqueueing_updated_on: Option<DateTime<Utc>>,
}

impl ScheduleRow {
    pub(crate) fn into_record(
        self,
        scheduled_jobs: Vec<ScheduledJobRecord>,
    ) -> Result<ScheduleRecord, ParseEnumError> {
        Ok(ScheduleRecord {
            id: self.id,
            application_name: self.application_name,
            queue_name: self.queue_name,
            name: self.name,
            start_on: self.start_on,
            end_on: self.end_on,
            repeat_type: self.repeat_type.parse()?,
            repeat_value: self.repeat_value,
            enabled: self.enabled,
            enqueueing: self.enqueueing,
            enqueueing_updated_on: self.enqueueing_updated_on,
            scheduled_jobs,
        })
    }
}

#[derive(FromRow, Debug)]
pub(crate) struct WorkerRow {
    id: i64,
    application_name: String,
    name: String,
    machine_address: String,
    machine_name: String,
    queue_names: String,
    status: String,
    signal: String,
    startup: String,
    updated_on: DateTime<Utc>,
    locked: bool,
    lock_updated_on: Option<DateTime<Utc>>,
}

impl TryFrom<WorkerRow> for WorkerRecord {
    type Error = ParseEnumError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        Ok(WorkerRecord {
            id: row.id,
            application_name: row.application_name,
            name: row.name,
            machine_address: row.machine_address,
            machine_name: row.machine_name,
            queue_names: row.queue_names,
            status: row.status.parse()?,
            signal: row.signal.parse()?,
            startup: row.startup.parse()?,
            updated_on: row.updated_on,
            locked: row.locked,
            lock_updated_on: row.lock_updated_on,
        })
    }
}
