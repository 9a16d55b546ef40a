use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use foreman_job::HistoryStatus;
use serde::{Deserialize, Serialize};

use crate::JobContext;

/// Retry budget used when a job does not override `retries`.
pub const DEFAULT_RETRIES: i32 = 3;

/// Timeout used when a job does not override `timeout_ms`, and for negative timeouts.
pub const DEFAULT_TIMEOUT_MS: i64 = 60_000;

/// Values a job body may return.
pub trait IntoJobResult {
    fn into_job_result(self) -> Result<(), String>;
}

impl IntoJobResult for () {
    fn into_job_result(self) -> Result<(), String> {
        Ok(())
    }
}

impl<E: Debug> IntoJobResult for Result<(), E> {
    fn into_job_result(self) -> Result<(), String> {
        self.map_err(|e| format!("{e:?}"))
    }
}

/// A job type that can be stored as JSON, claimed by a worker and executed.
///
/// The stored job data is deserialized into `Self`, so a schedule's job
/// definition populates the job's fields before it runs.
///
/// # Example
///
/// ```
/// use foreman_task_handler::{IntoJobResult, JobContext, JobHandler};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl JobHandler for SendEmail {
///     const JOB_TYPE: &'static str = "send_email";
///
///     fn retries(&self) -> i32 {
///         5
///     }
///
///     async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
///         println!("Sending email to {}", self.to);
///         Ok::<(), String>(())
///     }
/// }
/// ```
pub trait JobHandler: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// Identifier stored with every queue record of this job type
    const JOB_TYPE: &'static str;

    /// Display name recorded with the job
    fn name(&self) -> String {
        Self::JOB_TYPE.to_string()
    }

    /// `0` retries forever, `-1` never retries, otherwise the last try number that may be retried.
    fn retries(&self) -> i32 {
        DEFAULT_RETRIES
    }

    /// Milliseconds before the job is aborted. `0` means no timeout.
    fn timeout_ms(&self) -> i64 {
        DEFAULT_TIMEOUT_MS
    }

    fn execute(self, ctx: JobContext) -> impl Future<Output = impl IntoJobResult> + Send + 'static;
}

/// Resolves a job's configured timeout: `0` disables it, negative values fall back to the default.
pub fn effective_timeout(timeout_ms: i64) -> Option<Duration> {
    match timeout_ms {
        0 => None,
        ms if ms < 0 => Some(Duration::from_millis(DEFAULT_TIMEOUT_MS as u64)),
        ms => Some(Duration::from_millis(ms as u64)),
    }
}

/// Whether an attempt ending in `status` should be queued again.
pub fn should_retry(status: HistoryStatus, retries: i32, try_number: i32) -> bool {
    if !status.is_retryable() {
        return false;
    }

    match retries {
        0 => true,
        r if r < 0 => false,
        r => try_number <= r,
    }
}
