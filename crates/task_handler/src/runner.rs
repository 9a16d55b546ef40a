use std::time::{Duration, Instant};

use foreman_job::HistoryStatus;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use crate::{JobContext, PreparedJob};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunJobError {
    #[error("{0}")]
    Failed(String),

    #[error("Job panicked: {0}")]
    Panic(String),

    #[error("Job timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Job was canceled")]
    Canceled,
}

impl RunJobError {
    pub fn status(&self) -> HistoryStatus {
        match self {
            RunJobError::Failed(_) | RunJobError::Panic(_) => HistoryStatus::Failed,
            RunJobError::TimedOut(_) => HistoryStatus::TimedOut,
            RunJobError::Canceled => HistoryStatus::Canceled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnJobResult {
    pub duration: Duration,
    pub result: Result<(), RunJobError>,
}

impl SpawnJobResult {
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn result(&self) -> &Result<(), RunJobError> {
        &self.result
    }

    pub fn status(&self) -> HistoryStatus {
        match &self.result {
            Ok(()) => HistoryStatus::Succeeded,
            Err(e) => e.status(),
        }
    }

    /// Message recorded in history for unsuccessful attempts.
    pub fn exception(&self) -> Option<String> {
        self.result.as_ref().err().map(ToString::to_string)
    }
}

/// Aborts the job task and cancels its token once the runner stops waiting on it,
/// including when the runner itself is aborted.
struct AbortOnDrop {
    handle: JoinHandle<Result<(), String>>,
    cancellation: CancellationToken,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.cancellation.cancel();
        self.handle.abort();
    }
}

impl PreparedJob {
    /// Runs the job body on its own task, bounded by the job's timeout and by
    /// the cancellation token of `ctx`.
    ///
    /// Timeouts and cancellation abort the task at its next await point.
    /// Code that never yields keeps its thread until it checks
    /// `JobContext::is_cancelled`.
    pub async fn spawn(self, ctx: JobContext) -> SpawnJobResult {
        let start = Instant::now();
        let timeout = self.timeout();
        let cancellation = ctx.cancellation().clone();
        let span = tracing::info_span!("job", name = %self.name(), working_id = ctx.working_id());

        let mut guard = AbortOnDrop {
            handle: tokio::spawn((self.run)(ctx).instrument(span)),
            cancellation: cancellation.clone(),
        };

        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(RunJobError::Canceled),
            r = &mut guard.handle => match r {
                Ok(r) => r.map_err(RunJobError::Failed),
                Err(e) if e.is_panic() => Err(RunJobError::Panic(e.to_string())),
                Err(_) => Err(RunJobError::Canceled),
            },
            _ = deadline => Err(RunJobError::TimedOut(timeout.unwrap_or_default())),
        };
        drop(guard);

        let duration = start.elapsed();
        debug!(?duration, ?result, "Job finished");
        SpawnJobResult { duration, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IntoJobResult, JobHandler, JobRegistry};
    use chrono::Utc;
    use foreman_job::{QueueRecord, WorkingRecord};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    static SLOW_FINISHED: AtomicBool = AtomicBool::new(false);

    #[derive(Deserialize, Serialize)]
    struct Sleep {
        ms: u64,
        timeout_ms: i64,
    }

    impl JobHandler for Sleep {
        const JOB_TYPE: &'static str = "sleep";

        fn timeout_ms(&self) -> i64 {
            self.timeout_ms
        }

        async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
            tokio::time::sleep(Duration::from_millis(self.ms)).await;
        }
    }

    #[derive(Deserialize, Serialize)]
    struct Slow;

    impl JobHandler for Slow {
        const JOB_TYPE: &'static str = "slow";

        fn timeout_ms(&self) -> i64 {
            20
        }

        async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
            tokio::time::sleep(Duration::from_millis(500)).await;
            SLOW_FINISHED.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Deserialize, Serialize)]
    struct Explode {
        panic: bool,
    }

    impl JobHandler for Explode {
        const JOB_TYPE: &'static str = "explode";

        async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
            if self.panic {
                panic!("kaboom");
            }
            Err::<(), _>(anyhow::anyhow!("bad input"))
        }
    }

    fn registry() -> Arc<JobRegistry> {
        Arc::new(
            JobRegistry::new()
                .register::<Sleep>()
                .register::<Slow>()
                .register::<Explode>(),
        )
    }

    fn ctx(token: CancellationToken) -> JobContext {
        let queued = QueueRecord {
            id: 1,
            application_name: "app".into(),
            queue_name: "default".into(),
            job_name: "job".into(),
            job_type: "sleep".into(),
            data: "{}".into(),
            queued_on: Utc::now(),
            try_number: 1,
            schedule_id: None,
            locked: false,
            lock_updated_on: None,
        };
        JobContext::new(&WorkingRecord::from_queued(2, &queued, 3, Utc::now()), token)
    }

    #[tokio::test]
    async fn succeeds() {
        let job = registry()
            .prepare("sleep", r#"{"ms": 1, "timeout_ms": 1000}"#)
            .unwrap();
        let result = job.spawn(ctx(CancellationToken::new())).await;

        assert_eq!(result.status(), HistoryStatus::Succeeded);
        assert_eq!(result.exception(), None);
    }

    #[tokio::test]
    async fn failure_is_captured() {
        let job = registry().prepare("explode", r#"{"panic": false}"#).unwrap();
        let result = job.spawn(ctx(CancellationToken::new())).await;

        assert_eq!(result.status(), HistoryStatus::Failed);
        assert!(result.exception().unwrap().contains("bad input"));
    }

    #[tokio::test]
    async fn panic_is_a_failure() {
        let job = registry().prepare("explode", r#"{"panic": true}"#).unwrap();
        let result = job.spawn(ctx(CancellationToken::new())).await;

        assert_eq!(result.status(), HistoryStatus::Failed);
        assert!(matches!(result.result(), Err(RunJobError::Panic(_))));
    }

    #[tokio::test]
    async fn timeout_aborts_the_job() {
        let token = CancellationToken::new();
        let job = registry().prepare("slow", "null").unwrap();
        let result = job.spawn(ctx(token.clone())).await;

        assert_eq!(result.status(), HistoryStatus::TimedOut);
        assert!(result.duration() < Duration::from_millis(500));
        assert!(token.is_cancelled());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!SLOW_FINISHED.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_stops_the_job() {
        let token = CancellationToken::new();
        let job = registry()
            .prepare("sleep", r#"{"ms": 5000, "timeout_ms": 0}"#)
            .unwrap();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = job.spawn(ctx(token)).await;
        assert_eq!(result.status(), HistoryStatus::Canceled);
        assert_eq!(result.exception().as_deref(), Some("Job was canceled"));
    }
}
