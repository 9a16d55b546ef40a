use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foreman_job::{
    HistoryRecord, NewHistoryRecord, NewQueueRecord, NewScheduleRecord, NewWorkerRecord,
    QueueRecord, ScheduleRecord, ScheduledJobRecord, Signals, WorkerRecord, WorkerSignal,
    WorkerStatus, WorkingRecord, WorkingSignal,
};
use foreman_queue_filters::QueueNameFilters;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::{lock_is_acquirable, LockTarget, Result, Store};

#[derive(Default)]
struct State {
    next_id: i64,
    queue: BTreeMap<i64, QueueRecord>,
    working: BTreeMap<i64, WorkingRecord>,
    history: BTreeMap<i64, HistoryRecord>,
    schedules: BTreeMap<i64, ScheduleRecord>,
    workers: BTreeMap<i64, WorkerRecord>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_queued(&mut self, record: NewQueueRecord) -> QueueRecord {
        let id = self.next_id();
        let queued = QueueRecord {
            id,
            application_name: record.application_name,
            queue_name: record.queue_name,
            job_name: record.job_name,
            job_type: record.job_type,
            data: record.data,
            queued_on: record.queued_on,
            try_number: record.try_number,
            schedule_id: record.schedule_id,
            locked: false,
            lock_updated_on: None,
        };
        self.queue.insert(id, queued.clone());
        queued
    }

    fn insert_history(&mut self, record: NewHistoryRecord) -> HistoryRecord {
        let id = self.next_id();
        let history = record.into_record(id);
        self.history.insert(id, history.clone());
        history
    }

    fn next_queued(
        &self,
        application_name: &str,
        filters: &QueueNameFilters,
        queued_before: DateTime<Utc>,
    ) -> Option<&QueueRecord> {
        self.queue
            .values()
            .filter(|q| {
                q.application_name == application_name
                    && !q.locked
                    && q.queued_on <= queued_before
                    && filters.includes(&q.queue_name)
            })
            .min_by_key(|q| (q.queued_on, q.id))
    }

    fn lock_fields(&mut self, target: LockTarget) -> Option<(&mut bool, &mut Option<DateTime<Utc>>)> {
        match target {
            LockTarget::Queue(id) => self
                .queue
                .get_mut(&id)
                .map(|r| (&mut r.locked, &mut r.lock_updated_on)),
            LockTarget::Working(id) => self
                .working
                .get_mut(&id)
                .map(|r| (&mut r.locked, &mut r.lock_updated_on)),
            LockTarget::Worker(id) => self
                .workers
                .get_mut(&id)
                .map(|r| (&mut r.locked, &mut r.lock_updated_on)),
            LockTarget::Schedule(id) => self
                .schedules
                .get_mut(&id)
                .map(|r| (&mut r.enqueueing, &mut r.enqueueing_updated_on)),
        }
    }
}

/// A `Store` kept entirely in process memory.
///
/// Every operation runs under one mutex, which makes each of them atomic the
/// same way a database transaction would. Useful for tests and for embedding
/// foreman in a single process.
pub struct MemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MemoryStore {
            state: Mutex::new(State::default()),
            clock,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn acquire_lock(
        &self,
        target: LockTarget,
        force_if_older_than: DateTime<Utc>,
    ) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some((locked, lock_updated_on)) = state.lock_fields(target) else {
            return Ok(false);
        };

        if !lock_is_acquirable(*locked, *lock_updated_on, force_if_older_than) {
            return Ok(false);
        }

        *locked = true;
        *lock_updated_on = Some(now);
        Ok(true)
    }

    async fn release_lock(&self, target: LockTarget) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some((locked, _)) = state.lock_fields(target) {
            *locked = false;
        }
        Ok(())
    }

    async fn enqueue(&self, record: NewQueueRecord) -> Result<QueueRecord> {
        let mut state = self.state.lock().await;
        Ok(state.insert_queued(record))
    }

    async fn get_queued(
        &self,
        application_name: &str,
        filters: &QueueNameFilters,
        queued_before: DateTime<Utc>,
    ) -> Result<Option<QueueRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .next_queued(application_name, filters, queued_before)
            .cloned())
    }

    async fn get_all_queued(&self, application_name: &str) -> Result<Vec<QueueRecord>> {
        let state = self.state.lock().await;
        let mut queued: Vec<_> = state
            .queue
            .values()
            .filter(|q| q.application_name == application_name)
            .cloned()
            .collect();
        queued.sort_by_key(|q| (q.queued_on, q.id));
        Ok(queued)
    }

    async fn claim_queued(
        &self,
        application_name: &str,
        worker_id: i64,
        filters: &QueueNameFilters,
        queued_before: DateTime<Utc>,
    ) -> Result<Option<WorkingRecord>> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let Some(queued_id) = state
            .next_queued(application_name, filters, queued_before)
            .map(|q| q.id)
        else {
            return Ok(None);
        };

        let Some(queued) = state.queue.remove(&queued_id) else {
            return Ok(None);
        };
        let id = state.next_id();
        let working = WorkingRecord::from_queued(id, &queued, worker_id, now);
        state.working.insert(id, working.clone());
        debug!(queued_id, working_id = id, worker_id, "Claimed queued job");

        Ok(Some(working))
    }

    async fn get_working(&self, id: i64) -> Result<Option<WorkingRecord>> {
        let state = self.state.lock().await;
        Ok(state.working.get(&id).cloned())
    }

    async fn get_working_for_worker(&self, worker_id: i64) -> Result<Vec<WorkingRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .working
            .values()
            .filter(|w| w.worker_id == worker_id)
            .cloned()
            .collect())
    }

    async fn complete_working(
        &self,
        working_id: i64,
        history: NewHistoryRecord,
        retry: Option<NewQueueRecord>,
    ) -> Result<Option<HistoryRecord>> {
        let mut state = self.state.lock().await;
        if state.working.remove(&working_id).is_none() {
            return Ok(None);
        }

        let history = state.insert_history(history);
        if let Some(retry) = retry {
            state.insert_queued(retry);
        }

        Ok(Some(history))
    }

    async fn get_history(&self, application_name: &str) -> Result<Vec<HistoryRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .values()
            .filter(|h| h.application_name == application_name)
            .cloned()
            .collect())
    }

    async fn take_signals(
        &self,
        worker_id: i64,
        working_id: Option<i64>,
    ) -> Result<Option<Signals>> {
        let mut state = self.state.lock().await;
        let Some(worker) = state.workers.get_mut(&worker_id) else {
            return Ok(None);
        };

        let mut signals = Signals {
            worker_name: worker.name.clone(),
            queue_names: worker.queue_names.clone(),
            worker_signal: std::mem::take(&mut worker.signal),
            ..Default::default()
        };

        if let Some(working) = working_id
            .and_then(|id| state.working.get_mut(&id))
            .filter(|w| w.worker_id == worker_id)
        {
            signals.working_id = Some(working.id);
            signals.working_signal = std::mem::take(&mut working.signal);
        }

        Ok(Some(signals))
    }

    async fn set_worker_signal(&self, worker_id: i64, signal: WorkerSignal) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(match state.workers.get_mut(&worker_id) {
            Some(worker) => {
                worker.signal = signal;
                worker.updated_on = now;
                true
            }
            None => false,
        })
    }

    async fn set_working_signal(&self, working_id: i64, signal: WorkingSignal) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.working.get_mut(&working_id) {
            Some(working) => {
                working.signal = signal;
                true
            }
            None => false,
        })
    }

    async fn get_schedules(&self, application_name: &str) -> Result<Vec<ScheduleRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .schedules
            .values()
            .filter(|s| s.application_name == application_name)
            .cloned()
            .collect())
    }

    async fn create_schedule(&self, schedule: NewScheduleRecord) -> Result<ScheduleRecord> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let mut scheduled_jobs = Vec::with_capacity(schedule.jobs.len());
        for (number, job) in schedule.jobs.into_iter().enumerate() {
            scheduled_jobs.push(ScheduledJobRecord {
                id: state.next_id(),
                schedule_id: id,
                job_type: job.job_type,
                data: job.data,
                number: number as i32 + 1,
            });
        }

        let record = ScheduleRecord {
            id,
            application_name: schedule.application_name,
            queue_name: schedule.queue_name,
            name: schedule.name,
            start_on: schedule.start_on,
            end_on: schedule.end_on,
            repeat_type: schedule.repeat_type,
            repeat_value: schedule.repeat_value,
            enabled: schedule.enabled,
            enqueueing: false,
            enqueueing_updated_on: None,
            scheduled_jobs,
        };
        state.schedules.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_schedule(&self, id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.schedules.remove(&id).is_some())
    }

    async fn schedule_date_exists(&self, schedule_id: i64, date: DateTime<Utc>) -> Result<bool> {
        let state = self.state.lock().await;
        let matches = |id: Option<i64>, queued_on: DateTime<Utc>| {
            id == Some(schedule_id) && queued_on == date
        };

        Ok(state
            .queue
            .values()
            .any(|q| matches(q.schedule_id, q.queued_on))
            || state
                .working
                .values()
                .any(|w| matches(w.schedule_id, w.queued_on))
            || state
                .history
                .values()
                .any(|h| matches(h.schedule_id, h.queued_on)))
    }

    async fn create_queued_and_history_for_schedule(
        &self,
        schedule_id: i64,
        date: DateTime<Utc>,
        queued: Vec<NewQueueRecord>,
        history: Vec<NewHistoryRecord>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        debug!(
            schedule_id,
            %date,
            queued = queued.len(),
            failed = history.len(),
            "Inserting scheduled occurrence"
        );
        for record in queued {
            state.insert_queued(record);
        }
        for record in history {
            state.insert_history(record);
        }
        Ok(())
    }

    async fn get_workers(
        &self,
        application_name: &str,
        machine_address: &str,
        machine_name: &str,
    ) -> Result<Vec<WorkerRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .workers
            .values()
            .filter(|w| {
                w.application_name == application_name
                    && w.machine_address == machine_address
                    && w.machine_name == machine_name
            })
            .cloned()
            .collect())
    }

    async fn get_worker(&self, id: i64) -> Result<Option<WorkerRecord>> {
        let state = self.state.lock().await;
        Ok(state.workers.get(&id).cloned())
    }

    async fn create_worker(&self, worker: NewWorkerRecord) -> Result<WorkerRecord> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let record = WorkerRecord {
            id,
            application_name: worker.application_name,
            name: worker.name,
            machine_address: worker.machine_address,
            machine_name: worker.machine_name,
            queue_names: worker.queue_names,
            status: worker.status,
            signal: WorkerSignal::None,
            startup: worker.startup,
            updated_on: now,
            locked: false,
            lock_updated_on: None,
        };
        state.workers.insert(id, record.clone());
        Ok(record)
    }

    async fn update_worker_queue_names(&self, id: i64, queue_names: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(match state.workers.get_mut(&id) {
            Some(worker) => {
                worker.queue_names = queue_names.to_string();
                worker.updated_on = now;
                true
            }
            None => false,
        })
    }

    async fn update_worker_status(&self, id: i64, status: WorkerStatus) -> Result<bool> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        Ok(match state.workers.get_mut(&id) {
            Some(worker) => {
                worker.status = status;
                worker.updated_on = now;
                true
            }
            None => false,
        })
    }

    async fn delete_worker(&self, id: i64) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.workers.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::mock::MockClock;
    use chrono::{Duration, TimeZone};
    use foreman_job::{HistoryStatus, NewScheduledJobRecord, ScheduleRepeatType};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new(start());
        (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
    }

    fn job(queue: &str, queued_on: DateTime<Utc>) -> NewQueueRecord {
        NewQueueRecord::builder()
            .application_name("app")
            .queue_name(queue)
            .job_type("noop")
            .queued_on(queued_on)
            .build()
    }

    async fn worker(store: &MemoryStore) -> WorkerRecord {
        store
            .create_worker(
                NewWorkerRecord::builder()
                    .application_name("app")
                    .name("w")
                    .machine_address("127.0.0.1")
                    .machine_name("host")
                    .build(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn claim_takes_earliest_matching_record() {
        let (store, _) = store();
        let later = store.enqueue(job("a", start())).await.unwrap();
        let earlier = store
            .enqueue(job("a", start() - Duration::minutes(1)))
            .await
            .unwrap();
        store
            .enqueue(job("c", start() - Duration::hours(1)))
            .await
            .unwrap();

        let filters = QueueNameFilters::parse("a,b,not:c");
        let working = store
            .claim_queued("app", 1, &filters, start())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(working.queued_on, earlier.queued_on);
        assert_eq!(working.worker_id, 1);
        assert_eq!(working.started_on, start());

        let remaining = store.get_all_queued("app").await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|q| q.id != earlier.id));
        assert!(store.get_working(working.id).await.unwrap().is_some());

        let next = store
            .claim_queued("app", 1, &filters, start())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next.queued_on, later.queued_on);
        assert!(store
            .claim_queued("app", 1, &filters, start())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn claim_ignores_future_and_locked_records() {
        let (store, _) = store();
        store
            .enqueue(job("a", start() + Duration::minutes(5)))
            .await
            .unwrap();
        let locked = store.enqueue(job("a", start())).await.unwrap();
        assert!(store
            .acquire_lock(LockTarget::Queue(locked.id), start())
            .await
            .unwrap());

        let filters = QueueNameFilters::any();
        assert!(store
            .claim_queued("app", 1, &filters, start())
            .await
            .unwrap()
            .is_none());

        store.release_lock(LockTarget::Queue(locked.id)).await.unwrap();
        assert!(store
            .claim_queued("app", 1, &filters, start())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn concurrent_claims_hand_out_each_record_once() {
        let (store, _) = store();
        let store = Arc::new(store);
        for _ in 0..20 {
            store.enqueue(job("a", start())).await.unwrap();
        }

        let mut handles = Vec::new();
        for worker_id in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(w) = store
                    .claim_queued("app", worker_id, &QueueNameFilters::any(), start())
                    .await
                    .unwrap()
                {
                    claimed.push(w.id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn lock_respects_staleness_threshold() {
        let (store, clock) = store();
        let worker = worker(&store).await;
        let target = LockTarget::Worker(worker.id);

        assert!(store.acquire_lock(target, start()).await.unwrap());

        clock.advance(Duration::seconds(5));
        let threshold = clock.now() - Duration::seconds(10);
        assert!(!store.acquire_lock(target, threshold).await.unwrap());

        clock.advance(Duration::seconds(15));
        let threshold = clock.now() - Duration::seconds(10);
        assert!(store.acquire_lock(target, threshold).await.unwrap());

        store.release_lock(target).await.unwrap();
        assert!(store.acquire_lock(target, start()).await.unwrap());
        assert!(!store
            .acquire_lock(LockTarget::Worker(worker.id + 100), start())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn signals_are_read_once() {
        let (store, _) = store();
        let worker = worker(&store).await;
        store.enqueue(job("a", start())).await.unwrap();
        let working = store
            .claim_queued("app", worker.id, &QueueNameFilters::any(), start())
            .await
            .unwrap()
            .unwrap();

        store
            .set_worker_signal(worker.id, WorkerSignal::Stop)
            .await
            .unwrap();
        store
            .set_working_signal(working.id, WorkingSignal::Cancel)
            .await
            .unwrap();

        let signals = store
            .take_signals(worker.id, Some(working.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signals.worker_signal, WorkerSignal::Stop);
        assert_eq!(signals.working_signal, WorkingSignal::Cancel);
        assert_eq!(signals.working_id, Some(working.id));
        assert_eq!(signals.queue_names, "*");

        let signals = store
            .take_signals(worker.id, Some(working.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signals.worker_signal, WorkerSignal::None);
        assert_eq!(signals.working_signal, WorkingSignal::None);

        store.delete_worker(worker.id).await.unwrap();
        assert!(store.take_signals(worker.id, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn working_signal_of_another_worker_is_untouched() {
        let (store, _) = store();
        let first = worker(&store).await;
        let second = worker(&store).await;
        store.enqueue(job("a", start())).await.unwrap();
        let working = store
            .claim_queued("app", second.id, &QueueNameFilters::any(), start())
            .await
            .unwrap()
            .unwrap();
        store
            .set_working_signal(working.id, WorkingSignal::Cancel)
            .await
            .unwrap();

        let signals = store
            .take_signals(first.id, Some(working.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(signals.working_id, None);
        assert_eq!(
            store.get_working(working.id).await.unwrap().unwrap().signal,
            WorkingSignal::Cancel
        );
    }

    #[tokio::test]
    async fn complete_working_is_all_or_nothing() {
        let (store, _) = store();
        store.enqueue(job("a", start())).await.unwrap();
        let working = store
            .claim_queued("app", 1, &QueueNameFilters::any(), start())
            .await
            .unwrap()
            .unwrap();

        let history = NewHistoryRecord::from_working(&working, HistoryStatus::Failed, start(), None);
        let retry = NewQueueRecord::retry_of(&working, start());

        let completed = store
            .complete_working(working.id, history.clone(), Some(retry.clone()))
            .await
            .unwrap();
        assert!(completed.is_some());
        assert_eq!(store.get_all_queued("app").await.unwrap()[0].try_number, 2);

        let again = store
            .complete_working(working.id, history, Some(retry))
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(store.get_history("app").await.unwrap().len(), 1);
        assert_eq!(store.get_all_queued("app").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn schedule_date_exists_checks_every_table() {
        let (store, _) = store();
        let schedule = store
            .create_schedule(
                NewScheduleRecord::builder()
                    .application_name("app")
                    .name("hourly")
                    .start_on(start())
                    .repeat_type(ScheduleRepeatType::Hours)
                    .repeat_value(1)
                    .job(NewScheduledJobRecord {
                        job_type: "noop".into(),
                        data: "{}".into(),
                    })
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(schedule.scheduled_jobs[0].number, 1);

        let date = start() + Duration::hours(1);
        assert!(!store.schedule_date_exists(schedule.id, date).await.unwrap());

        let mut queued = job("a", date);
        queued.schedule_id = Some(schedule.id);
        store
            .create_queued_and_history_for_schedule(schedule.id, date, vec![queued], vec![])
            .await
            .unwrap();
        assert!(store.schedule_date_exists(schedule.id, date).await.unwrap());

        let working = store
            .claim_queued("app", 1, &QueueNameFilters::any(), date)
            .await
            .unwrap()
            .unwrap();
        assert!(store.schedule_date_exists(schedule.id, date).await.unwrap());

        store
            .complete_working(
                working.id,
                NewHistoryRecord::from_working(&working, HistoryStatus::Succeeded, date, None),
                None,
            )
            .await
            .unwrap();
        assert!(store.schedule_date_exists(schedule.id, date).await.unwrap());
        assert!(!store
            .schedule_date_exists(schedule.id, date + Duration::hours(1))
            .await
            .unwrap());
    }
}
