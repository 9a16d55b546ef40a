use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use foreman_job::{NewHistoryRecord, NewQueueRecord, ScheduleRecord};
use foreman_lifecycle_hooks::{HookRegistry, ScheduleEnqueuedContext};
use foreman_queue_filters::QueueNameFilters;
use foreman_store::clock::{Clock, SystemClock};
use foreman_store::{LockTarget, Store};
use foreman_task_handler::JobRegistry;
use getset::Getters;
use tracing::{debug, info, warn};

use crate::date::calculate_schedule_date;
use crate::{Result, ScheduleError, DEFAULT_LOCK_TIMEOUT};

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|e| ScheduleError::InvalidWindow(e.to_string()))
}

/// Evaluates the enabled schedules of one application and enqueues every due
/// occurrence exactly once, even when several schedulers share the store.
///
/// Each scheduler belongs to a single worker and only looks at schedules whose
/// queue passes that worker's queue filters.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct Scheduler {
    application_name: String,
    /// Worker recorded on history rows of jobs that could not be deserialized
    worker_id: Option<i64>,
    /// Width of the first window, before anything was enqueued
    heartbeat: Duration,
    /// Age after which another scheduler's enqueueing lock is overridden
    lock_timeout: Duration,
    queue_filters: QueueNameFilters,
    last_enqueued_on: Option<DateTime<Utc>>,
    #[getset(skip)]
    schedules: Option<Vec<ScheduleRecord>>,
    #[getset(skip)]
    store: Arc<dyn Store>,
    #[getset(skip)]
    registry: Arc<JobRegistry>,
    #[getset(skip)]
    hooks: Arc<HookRegistry>,
    #[getset(skip)]
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        application_name: impl Into<String>,
        store: Arc<dyn Store>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Scheduler {
            application_name: application_name.into(),
            worker_id: None,
            heartbeat: Duration::from_secs(10),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            queue_filters: QueueNameFilters::any(),
            last_enqueued_on: None,
            schedules: None,
            store,
            registry,
            hooks: Arc::new(HookRegistry::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_worker_id(mut self, worker_id: i64) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_queue_filters(mut self, queue_filters: QueueNameFilters) -> Self {
        self.queue_filters = queue_filters;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Cached schedules, empty until the first refresh.
    pub fn schedules(&self) -> &[ScheduleRecord] {
        self.schedules.as_deref().unwrap_or_default()
    }

    /// Replaces the queue filters. Cached schedules are reloaded on the next pass.
    pub fn set_queue_filters(&mut self, queue_filters: QueueNameFilters) {
        if self.queue_filters != queue_filters {
            self.queue_filters = queue_filters;
            self.schedules = None;
        }
    }

    /// Reloads the enabled schedules matching the queue filters. Returns how many are cached.
    pub async fn refresh_schedules(&mut self) -> Result<usize> {
        let schedules: Vec<_> = self
            .store
            .get_schedules(&self.application_name)
            .await?
            .into_iter()
            .filter(|s| s.enabled && self.queue_filters.includes(&s.queue_name))
            .collect();

        debug!(count = schedules.len(), "Refreshed schedules");
        let count = schedules.len();
        self.schedules = Some(schedules);
        Ok(count)
    }

    /// Whether `schedule` has an occurrence in `(window_begin, window_end]` that was not enqueued yet.
    pub async fn can_schedule_be_enqueued(
        &self,
        schedule: &ScheduleRecord,
        window_begin: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<(bool, Option<DateTime<Utc>>)> {
        let Some(date) = calculate_schedule_date(schedule, window_begin, window_end) else {
            return Ok((false, None));
        };

        let exists = self.store.schedule_date_exists(schedule.id, date).await?;
        Ok((!exists, Some(date)))
    }

    /// Enqueues the occurrences due since the previous call.
    ///
    /// The window always advances to now, whatever happens to individual
    /// schedules. Failures of one schedule are logged and do not stop the others.
    /// Returns the number of occurrences enqueued by this call.
    pub async fn enqueue_scheduled_jobs(&mut self) -> Result<usize> {
        let now = self.clock.now();
        let window_begin = match self.last_enqueued_on {
            Some(last) => last,
            None => now - to_chrono(self.heartbeat)?,
        };
        self.last_enqueued_on = Some(now);

        if self.schedules.is_none() {
            self.refresh_schedules().await?;
        }

        let mut enqueued = 0;
        for schedule in self.schedules() {
            match self.enqueue_schedule(schedule, window_begin, now).await {
                Ok(true) => enqueued += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    schedule_id = schedule.id,
                    error = %e,
                    "Failed to enqueue schedule"
                ),
            }
        }

        Ok(enqueued)
    }

    async fn enqueue_schedule(
        &self,
        schedule: &ScheduleRecord,
        window_begin: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<bool> {
        let target = LockTarget::Schedule(schedule.id);
        let force_if_older_than = self.clock.now() - to_chrono(self.lock_timeout)?;

        if !self.store.acquire_lock(target, force_if_older_than).await? {
            debug!(schedule_id = schedule.id, "Schedule is being enqueued elsewhere");
            return Ok(false);
        }

        let result = self
            .enqueue_locked(schedule, window_begin, window_end)
            .await;

        if let Err(e) = self.store.release_lock(target).await {
            warn!(schedule_id = schedule.id, error = %e, "Failed to release schedule lock");
        }

        result
    }

    async fn enqueue_locked(
        &self,
        schedule: &ScheduleRecord,
        window_begin: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<bool> {
        let (eligible, date) = self
            .can_schedule_be_enqueued(schedule, window_begin, window_end)
            .await?;
        let Some(date) = date.filter(|_| eligible) else {
            return Ok(false);
        };

        let now = self.clock.now();
        let mut queued = Vec::with_capacity(schedule.scheduled_jobs.len());
        let mut failed = Vec::new();

        for job in &schedule.scheduled_jobs {
            let mut record = NewQueueRecord::builder()
                .application_name(schedule.application_name.clone())
                .queue_name(schedule.queue_name.clone())
                .job_name(schedule.name.clone())
                .job_type(job.job_type.clone())
                .data(job.data.clone())
                .queued_on(date)
                .schedule_id(schedule.id)
                .build();

            match self.registry.prepare(&job.job_type, &job.data) {
                Ok(prepared) => {
                    record.job_name = prepared.name().clone();
                    queued.push(record);
                }
                Err(e) => {
                    warn!(
                        schedule_id = schedule.id,
                        job_type = %job.job_type,
                        error = %e,
                        "Scheduled job could not be loaded"
                    );
                    failed.push(NewHistoryRecord::failed_before_queue(
                        &record,
                        self.worker_id,
                        now,
                        e.to_string(),
                    ));
                }
            }
        }

        let (queued_count, failed_count) = (queued.len(), failed.len());
        self.store
            .create_queued_and_history_for_schedule(schedule.id, date, queued, failed)
            .await?;

        info!(
            schedule_id = schedule.id,
            schedule = %schedule.name,
            %date,
            queued = queued_count,
            failed = failed_count,
            "Enqueued scheduled jobs"
        );
        self.hooks
            .emit(ScheduleEnqueuedContext {
                schedule_id: schedule.id,
                schedule_name: schedule.name.clone(),
                date,
                queued: queued_count,
                failed: failed_count,
            })
            .await;

        Ok(true)
    }
}
