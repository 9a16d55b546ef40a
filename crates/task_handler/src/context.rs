use foreman_job::WorkingRecord;
use getset::Getters;
use tokio_util::sync::CancellationToken;

/// What a running job knows about itself.
#[derive(Getters, Clone, Debug)]
#[getset(get = "pub")]
pub struct JobContext {
    worker_id: i64,
    working_id: i64,
    queue_name: String,
    job_name: String,
    job_type: String,
    try_number: i32,
    schedule_id: Option<i64>,
    /// Cancelled when the job timed out or was canceled. Code that does not
    /// yield to the runtime should check it.
    cancellation: CancellationToken,
}

impl JobContext {
    pub fn new(working: &WorkingRecord, cancellation: CancellationToken) -> Self {
        JobContext {
            worker_id: working.worker_id,
            working_id: working.id,
            queue_name: working.queue_name.clone(),
            job_name: working.job_name.clone(),
            job_type: working.job_type.clone(),
            try_number: working.try_number,
            schedule_id: working.schedule_id,
            cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
