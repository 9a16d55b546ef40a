use std::sync::Arc;

use chrono::{DateTime, Utc};
use foreman_job::{
    NewQueueRecord, NewScheduleRecord, NewWorkerRecord, QueueRecord, ScheduleRecord, WorkerRecord,
    WorkerSignal, WorkingSignal,
};
use foreman_store::Store;
use foreman_task_handler::JobHandler;
use tracing::info;

use crate::errors::Result;

/// Writes the records and signals that steer a running deployment:
/// enqueued jobs, worker records, schedules and control signals.
///
/// Signals are picked up by the target worker within one heartbeat.
#[derive(Clone)]
pub struct ControlPlane {
    application_name: String,
    store: Arc<dyn Store>,
}

impl ControlPlane {
    pub fn new(application_name: &str, store: Arc<dyn Store>) -> Self {
        ControlPlane {
            application_name: application_name.into(),
            store,
        }
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Queues `job` to run as soon as a worker of `queue_name` is free.
    pub async fn enqueue<T: JobHandler>(&self, queue_name: &str, job: &T) -> Result<QueueRecord> {
        self.enqueue_at(queue_name, job, Utc::now()).await
    }

    /// Queues `job` to run no earlier than `run_at`.
    pub async fn enqueue_at<T: JobHandler>(
        &self,
        queue_name: &str,
        job: &T,
        run_at: DateTime<Utc>,
    ) -> Result<QueueRecord> {
        let record = NewQueueRecord::builder()
            .application_name(self.application_name.clone())
            .queue_name(queue_name)
            .job_name(job.name())
            .job_type(T::JOB_TYPE)
            .data(serde_json::to_string(job)?)
            .queued_on(run_at)
            .build();

        let queued = self.store.enqueue(record).await?;
        info!(queue_id = queued.id, job_type = T::JOB_TYPE, %queue_name, "Job enqueued");
        Ok(queued)
    }

    /// Sends a control signal to a worker. Returns `false` if the worker does not exist.
    pub async fn signal_worker(&self, worker_id: i64, signal: WorkerSignal) -> Result<bool> {
        Ok(self.store.set_worker_signal(worker_id, signal).await?)
    }

    pub async fn start_worker(&self, worker_id: i64) -> Result<bool> {
        self.signal_worker(worker_id, WorkerSignal::Start).await
    }

    pub async fn stop_worker(&self, worker_id: i64) -> Result<bool> {
        self.signal_worker(worker_id, WorkerSignal::Stop).await
    }

    pub async fn refresh_schedules(&self, worker_id: i64) -> Result<bool> {
        self.signal_worker(worker_id, WorkerSignal::RefreshSchedules).await
    }

    /// Asks the worker running `working_id` to abort it. Returns `false` if the
    /// job is no longer running.
    pub async fn cancel_job(&self, working_id: i64) -> Result<bool> {
        Ok(self
            .store
            .set_working_signal(working_id, WorkingSignal::Cancel)
            .await?)
    }

    pub async fn create_worker(&self, worker: NewWorkerRecord) -> Result<WorkerRecord> {
        Ok(self.store.create_worker(worker).await?)
    }

    /// Changes the queues a worker serves.
    pub async fn set_worker_queue_names(&self, worker_id: i64, queue_names: &str) -> Result<bool> {
        Ok(self
            .store
            .update_worker_queue_names(worker_id, queue_names)
            .await?)
    }

    /// Deletes a worker record. Its worker stops within one heartbeat.
    pub async fn delete_worker(&self, worker_id: i64) -> Result<bool> {
        Ok(self.store.delete_worker(worker_id).await?)
    }

    pub async fn create_schedule(&self, schedule: NewScheduleRecord) -> Result<ScheduleRecord> {
        Ok(self.store.create_schedule(schedule).await?)
    }

    pub async fn delete_schedule(&self, schedule_id: i64) -> Result<bool> {
        Ok(self.store.delete_schedule(schedule_id).await?)
    }
}
