use std::ops::ControlFlow;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use foreman_job::{
    HistoryStatus, NewHistoryRecord, NewQueueRecord, Signals, WorkerRecord, WorkerSignal,
    WorkerStatus, WorkingRecord, WorkingSignal,
};
use foreman_lifecycle_hooks::{
    HookRegistry, JobCompleteContext, JobStartContext, WorkerStartContext, WorkerStopContext,
};
use foreman_queue_filters::QueueNameFilters;
use foreman_schedule_runner::{Scheduler, DEFAULT_LOCK_TIMEOUT};
use foreman_store::clock::{Clock, SystemClock};
use foreman_store::Store;
use foreman_task_handler::{should_retry, JobContext, JobRegistry};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::errors::Result;
use crate::utils::{jittered, lock};

const INTERRUPTED_MESSAGE: &str = "Worker stopped before the job finished";

/// Everything a [`Worker`] needs besides its record.
pub struct WorkerParams {
    pub record: WorkerRecord,
    /// Base interval of the polling and control loops
    pub heartbeat: Duration,
    pub scheduler_enabled: bool,
    pub schedule_lock_timeout: Duration,
    pub store: Arc<dyn Store>,
    pub registry: Arc<JobRegistry>,
    pub hooks: Arc<HookRegistry>,
    pub clock: Arc<dyn Clock>,
}

impl WorkerParams {
    pub fn new(record: WorkerRecord, store: Arc<dyn Store>, registry: Arc<JobRegistry>) -> Self {
        WorkerParams {
            record,
            heartbeat: Duration::from_secs(10),
            scheduler_enabled: true,
            schedule_lock_timeout: DEFAULT_LOCK_TIMEOUT,
            store,
            registry,
            hooks: Arc::new(HookRegistry::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn heartbeat(mut self, value: Duration) -> Self {
        self.heartbeat = value;
        self
    }

    pub fn scheduler_enabled(mut self, value: bool) -> Self {
        self.scheduler_enabled = value;
        self
    }

    pub fn schedule_lock_timeout(mut self, value: Duration) -> Self {
        self.schedule_lock_timeout = value;
        self
    }

    pub fn hooks(mut self, value: Arc<HookRegistry>) -> Self {
        self.hooks = value;
        self
    }

    pub fn clock(mut self, value: Arc<dyn Clock>) -> Self {
        self.clock = value;
        self
    }
}

/// The job the work loop currently owns.
#[derive(Clone)]
struct InFlight {
    working: Arc<WorkingRecord>,
    retries: i32,
}

#[derive(Clone, Default)]
enum Tracked {
    #[default]
    Idle,
    /// A claim is on its way to the store; its result is not tracked yet
    Claiming,
    Job(InFlight),
}

struct RunState {
    handle: Option<JoinHandle<()>>,
    stop: CancellationToken,
}

struct WorkerInner {
    id: i64,
    application_name: String,
    name: StdMutex<String>,
    heartbeat: Duration,
    scheduler_enabled: bool,
    queue_filters: StdMutex<QueueNameFilters>,
    /// Status region, always locked before `run`
    status: Mutex<WorkerStatus>,
    /// Run region: the work loop handle
    run: Mutex<RunState>,
    /// Lets a forced stop reach the work loop while another task holds the regions
    abort: StdMutex<Option<AbortHandle>>,
    tracked: StdMutex<Tracked>,
    scheduler: Mutex<Scheduler>,
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    hooks: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
}

/// One execution unit: a work loop claiming and running jobs while the
/// worker is `Working`, and a control loop that runs until disposal.
///
/// The control loop reclaims orphaned jobs, consumes the signals sent to the
/// worker record, follows queue filter changes and drives the scheduler.
pub struct Worker {
    inner: Arc<WorkerInner>,
    control: StdMutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Worker {
    /// Creates a stopped worker and spawns its control loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(params: WorkerParams) -> Self {
        let record = params.record;
        let queue_filters = QueueNameFilters::parse(&record.queue_names);

        let scheduler = Scheduler::new(&record.application_name, params.store.clone(), params.registry.clone())
            .with_worker_id(record.id)
            .with_heartbeat(params.heartbeat)
            .with_lock_timeout(params.schedule_lock_timeout)
            .with_queue_filters(queue_filters.clone())
            .with_hooks(params.hooks.clone())
            .with_clock(params.clock.clone());

        let inner = Arc::new(WorkerInner {
            id: record.id,
            application_name: record.application_name,
            name: StdMutex::new(record.name.clone()),
            heartbeat: params.heartbeat,
            scheduler_enabled: params.scheduler_enabled,
            queue_filters: StdMutex::new(queue_filters),
            status: Mutex::new(WorkerStatus::Stopped),
            run: Mutex::new(RunState {
                handle: None,
                stop: CancellationToken::new(),
            }),
            abort: StdMutex::new(None),
            tracked: StdMutex::new(Tracked::Idle),
            scheduler: Mutex::new(scheduler),
            store: params.store,
            registry: params.registry,
            hooks: params.hooks,
            clock: params.clock,
        });

        let shutdown = CancellationToken::new();
        let span = info_span!("worker", worker_id = record.id, name = %record.name);
        let control = tokio::spawn(inner.clone().control_loop(shutdown.clone()).instrument(span));

        Worker {
            inner,
            control: StdMutex::new(Some(control)),
            shutdown,
        }
    }

    pub fn id(&self) -> i64 {
        self.inner.id
    }

    pub fn name(&self) -> String {
        lock(&self.inner.name).clone()
    }

    pub fn queue_filters(&self) -> QueueNameFilters {
        lock(&self.inner.queue_filters).clone()
    }

    pub async fn status(&self) -> WorkerStatus {
        *self.inner.status.lock().await
    }

    /// The job being executed, if any.
    pub fn in_flight(&self) -> Option<Arc<WorkingRecord>> {
        match &*lock(&self.inner.tracked) {
            Tracked::Job(job) => Some(job.working.clone()),
            _ => None,
        }
    }

    /// Starts the work loop. Does nothing if already working, refused while stopping.
    pub async fn start(&self) {
        self.inner.start().await;
    }

    /// Stops the work loop, waiting for the current job unless `force` is set.
    /// A job still in flight afterwards is recorded as interrupted.
    pub async fn stop(&self, force: bool) {
        self.inner.stop(force).await;
    }

    /// Stops both loops. The worker cannot be restarted afterwards.
    pub async fn dispose(&self, force: bool) {
        if force {
            self.inner.abort_work_loop();
        }
        self.shutdown.cancel();

        let control = lock(&self.control).take();
        if let Some(control) = control {
            if let Err(e) = control.await {
                error!(worker_id = self.inner.id, error = %e, "Worker control loop panicked");
            }
        }

        self.inner.stop(force).await;
        debug!(worker_id = self.inner.id, "Worker disposed");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .finish()
    }
}

impl WorkerInner {
    fn tracked_id(&self) -> Option<i64> {
        match &*lock(&self.tracked) {
            Tracked::Job(job) => Some(job.working.id),
            _ => None,
        }
    }

    fn set_tracked(&self, tracked: Tracked) {
        *lock(&self.tracked) = tracked;
    }

    /// Stops tracking `working_id`, unless another job replaced it meanwhile.
    fn untrack(&self, working_id: i64) {
        let mut tracked = lock(&self.tracked);
        if matches!(&*tracked, Tracked::Job(job) if job.working.id == working_id) {
            *tracked = Tracked::Idle;
        }
    }

    fn take_in_flight(&self) -> Option<InFlight> {
        match std::mem::take(&mut *lock(&self.tracked)) {
            Tracked::Job(job) => Some(job),
            _ => None,
        }
    }

    fn abort_work_loop(&self) {
        if let Some(abort) = lock(&self.abort).as_ref() {
            abort.abort();
        }
    }

    async fn persist_status(&self, status: WorkerStatus) {
        if let Err(e) = self.store.update_worker_status(self.id, status).await {
            warn!(%status, error = %e, "Failed to persist worker status");
        }
    }

    fn spawn_work_loop(self: &Arc<Self>, run: &mut RunState) {
        run.stop = CancellationToken::new();
        let span = info_span!("work_loop", worker_id = self.id);
        let handle = tokio::spawn(self.clone().work_loop(run.stop.clone()).instrument(span));
        *lock(&self.abort) = Some(handle.abort_handle());
        run.handle = Some(handle);
    }

    async fn start(self: &Arc<Self>) {
        let mut status = self.status.lock().await;
        match *status {
            WorkerStatus::Working => {
                debug!(worker_id = self.id, "Worker already working");
                return;
            }
            WorkerStatus::Stopping => {
                warn!(worker_id = self.id, "Worker is stopping, start refused");
                return;
            }
            WorkerStatus::Stopped => {}
        }

        {
            let mut run = self.run.lock().await;
            self.spawn_work_loop(&mut run);
        }
        *status = WorkerStatus::Working;
        self.persist_status(WorkerStatus::Working).await;
        drop(status);

        let worker_name = lock(&self.name).clone();
        let queue_names = lock(&self.queue_filters).to_string();
        info!(worker_id = self.id, %worker_name, %queue_names, "Worker started");
        self.hooks
            .emit(WorkerStartContext {
                worker_id: self.id,
                worker_name,
                queue_names,
            })
            .await;
    }

    async fn stop(self: &Arc<Self>, force: bool) {
        let mut status = self.status.lock().await;
        if *status != WorkerStatus::Working {
            debug!(worker_id = self.id, %status, "Worker not working, nothing to stop");
            return;
        }
        *status = WorkerStatus::Stopping;
        self.persist_status(WorkerStatus::Stopping).await;

        let handle = {
            let mut run = self.run.lock().await;
            run.stop.cancel();
            run.handle.take()
        };

        if let Some(handle) = handle {
            if force {
                handle.abort();
            }
            match handle.await {
                Err(e) if e.is_panic() => error!(worker_id = self.id, error = %e, "Work loop panicked"),
                _ => {}
            }
        }
        *lock(&self.abort) = None;

        if let Some(job) = self.take_in_flight() {
            warn!(worker_id = self.id, working_id = job.working.id, "Interrupting job");
            if let Err(e) = self
                .finish(&job, HistoryStatus::Interrupted, Some(INTERRUPTED_MESSAGE.into()), Duration::ZERO)
                .await
            {
                error!(worker_id = self.id, error = %e, "Failed to record interrupted job");
            }
        }

        *status = WorkerStatus::Stopped;
        self.persist_status(WorkerStatus::Stopped).await;
        drop(status);

        let worker_name = lock(&self.name).clone();
        info!(worker_id = self.id, %worker_name, force, "Worker stopped");
        self.hooks
            .emit(WorkerStopContext {
                worker_id: self.id,
                worker_name,
                force,
            })
            .await;
    }

    /// Aborts the job `working_id` if it is the one in flight, records it as
    /// canceled and restarts the work loop.
    async fn cancel_in_flight(self: &Arc<Self>, working_id: i64) {
        let status = self.status.lock().await;
        let mut run = self.run.lock().await;

        if self.tracked_id() != Some(working_id) {
            debug!(worker_id = self.id, working_id, "Cancel signal for a job no longer in flight");
            return;
        }

        if let Some(handle) = run.handle.take() {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(job) = self.take_in_flight() {
            info!(worker_id = self.id, working_id, "Canceling job");
            if let Err(e) = self
                .finish(&job, HistoryStatus::Canceled, Some("Job was canceled".into()), Duration::ZERO)
                .await
            {
                error!(worker_id = self.id, working_id, error = %e, "Failed to record canceled job");
            }
        }

        if *status == WorkerStatus::Working {
            self.spawn_work_loop(&mut run);
        }
    }

    async fn work_loop(self: Arc<Self>, stop: CancellationToken) {
        loop {
            if stop.is_cancelled() {
                break;
            }

            let processed = match self.process_next().await {
                Ok(processed) => processed,
                Err(e) => {
                    error!(error = %e, "Failed to process next job");
                    false
                }
            };

            if !processed {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = tokio::time::sleep(jittered(self.heartbeat)) => {}
                }
            }
        }
        debug!("Work loop exited");
    }

    /// Claims and runs one job. Returns `false` when nothing was due.
    async fn process_next(&self) -> Result<bool> {
        let filters = lock(&self.queue_filters).clone();

        self.set_tracked(Tracked::Claiming);
        let claimed = self
            .store
            .claim_queued(&self.application_name, self.id, &filters, self.clock.now())
            .await;
        let working = match claimed {
            Ok(Some(working)) => Arc::new(working),
            Ok(None) => {
                self.set_tracked(Tracked::Idle);
                return Ok(false);
            }
            Err(e) => {
                self.set_tracked(Tracked::Idle);
                return Err(e.into());
            }
        };

        let prepared = self.registry.prepare(&working.job_type, &working.data);
        let job = InFlight {
            working: working.clone(),
            retries: prepared.as_ref().map_or(-1, |p| *p.retries()),
        };
        self.set_tracked(Tracked::Job(job.clone()));

        let result = match prepared {
            Err(e) => {
                warn!(working_id = working.id, job_type = %working.job_type, error = %e, "Failed to load job");
                self.finish(&job, HistoryStatus::Failed, Some(e.to_string()), Duration::ZERO)
                    .await
            }
            Ok(prepared) => {
                self.hooks
                    .emit(JobStartContext {
                        worker_id: self.id,
                        job: working.clone(),
                    })
                    .await;

                let ctx = JobContext::new(&working, CancellationToken::new());
                let outcome = prepared.spawn(ctx).await;
                self.finish(&job, outcome.status(), outcome.exception(), outcome.duration())
                    .await
            }
        };

        self.untrack(working.id);
        result.map(|()| true)
    }

    /// Replaces the working record of `job` by its history record, queuing
    /// the next attempt when the outcome is retryable and tries remain.
    async fn finish(
        &self,
        job: &InFlight,
        status: HistoryStatus,
        exception: Option<String>,
        duration: Duration,
    ) -> Result<()> {
        let working = &job.working;
        let now = self.clock.now();
        let retry = should_retry(status, job.retries, working.try_number)
            .then(|| NewQueueRecord::retry_of(working, now));
        let retried = retry.is_some();
        let history = NewHistoryRecord::from_working(working, status, now, exception.clone());

        if self
            .store
            .complete_working(working.id, history, retry)
            .await?
            .is_none()
        {
            debug!(working_id = working.id, "Job already completed elsewhere");
            return Ok(());
        }

        info!(
            working_id = working.id,
            job_name = %working.job_name,
            try_number = working.try_number,
            %status,
            retried,
            "Job completed"
        );
        self.hooks
            .emit(JobCompleteContext {
                worker_id: self.id,
                job: working.clone(),
                status,
                exception,
                duration,
                retried,
            })
            .await;
        Ok(())
    }

    async fn control_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            match self.control_iteration().await {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                Err(e) => error!(error = %e, "Worker control iteration failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(jittered(self.heartbeat)) => {}
            }
        }
        debug!("Control loop exited");
    }

    async fn control_iteration(self: &Arc<Self>) -> Result<ControlFlow<()>> {
        self.reclaim_orphans().await?;

        let Some(signals) = self.store.take_signals(self.id, self.tracked_id()).await? else {
            warn!(worker_id = self.id, "Worker record no longer exists, stopping");
            self.stop(false).await;
            return Ok(ControlFlow::Break(()));
        };

        self.apply_record(&signals).await;

        if signals.working_signal == WorkingSignal::Cancel {
            if let Some(working_id) = signals.working_id {
                self.cancel_in_flight(working_id).await;
            }
        }

        match signals.worker_signal {
            WorkerSignal::Stop => self.stop(false).await,
            WorkerSignal::Start => self.start().await,
            WorkerSignal::None | WorkerSignal::RefreshSchedules => {}
        }

        if self.scheduler_enabled && *self.status.lock().await == WorkerStatus::Working {
            let mut scheduler = self.scheduler.lock().await;
            if signals.worker_signal == WorkerSignal::RefreshSchedules {
                let count = scheduler.refresh_schedules().await?;
                info!(worker_id = self.id, count, "Schedules refreshed");
            } else {
                scheduler.enqueue_scheduled_jobs().await?;
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    /// Turns working records of this worker that no loop owns into
    /// interrupted history, e.g. those left by a crashed process.
    async fn reclaim_orphans(&self) -> Result<()> {
        let records = self.store.get_working_for_worker(self.id).await?;

        let owned = match &*lock(&self.tracked) {
            Tracked::Claiming => return Ok(()),
            Tracked::Idle => None,
            Tracked::Job(job) => Some(job.working.id),
        };

        for working in records.into_iter().filter(|w| Some(w.id) != owned) {
            warn!(worker_id = self.id, working_id = working.id, "Reclaiming orphaned job");
            let retries = self
                .registry
                .prepare(&working.job_type, &working.data)
                .map_or(-1, |p| *p.retries());
            let job = InFlight {
                working: Arc::new(working),
                retries,
            };
            self.finish(&job, HistoryStatus::Interrupted, Some(INTERRUPTED_MESSAGE.into()), Duration::ZERO)
                .await?;
        }
        Ok(())
    }

    async fn apply_record(&self, signals: &Signals) {
        *lock(&self.name) = signals.worker_name.clone();

        let filters = QueueNameFilters::parse(&signals.queue_names);
        let changed = {
            let mut current = lock(&self.queue_filters);
            if *current == filters {
                false
            } else {
                *current = filters.clone();
                true
            }
        };

        if changed {
            info!(worker_id = self.id, queue_names = %filters, "Queue filters changed");
            self.scheduler.lock().await.set_queue_filters(filters);
        }
    }
}
