use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};

use foreman_job::{NewWorkerRecord, WorkerRecord, WorkerStartupType, WorkerStatus};
use foreman_lifecycle_hooks::{HookRegistry, MachineReconcileContext};
use foreman_shutdown_signal::shutdown_signal;
use foreman_store::clock::Clock;
use foreman_store::Store;
use foreman_task_handler::JobRegistry;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::errors::Result;
use crate::options::{MachineConfig, MachineOptions, DEFAULT_WORKER_NAME};
use crate::utils::{jittered, lock};
use crate::worker::{Worker, WorkerParams};

struct MachineInner {
    config: MachineConfig,
    store: Arc<dyn Store>,
    registry: Arc<JobRegistry>,
    hooks: Arc<HookRegistry>,
    clock: Arc<dyn Clock>,
    workers: Mutex<WorkerSet>,
}

/// Workers owned by a machine, plus the records a reconciliation is still starting.
#[derive(Default)]
struct WorkerSet {
    running: BTreeMap<i64, Arc<Worker>>,
    pending: BTreeSet<i64>,
    creating_default: bool,
    closed: bool,
}

/// Runs the workers assigned to one machine of one application.
///
/// A single reconciliation loop keeps the running workers in line with the
/// worker records of this machine: new records get a worker, workers whose
/// record disappeared are disposed.
pub struct Machine {
    inner: Arc<MachineInner>,
    handle: StdMutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Machine {
    /// Reconciles once, then keeps reconciling in the background.
    ///
    /// # Errors
    ///
    /// Fails on options the loops cannot run with, or if the first
    /// reconciliation cannot read or create worker records.
    pub async fn start(
        options: MachineOptions,
        store: Arc<dyn Store>,
        registry: Arc<JobRegistry>,
    ) -> Result<Self> {
        let (config, hooks, clock) = options.into_parts();
        config.validate()?;
        let inner = Arc::new(MachineInner {
            config,
            store,
            registry,
            hooks: Arc::new(hooks),
            clock,
            workers: Mutex::new(WorkerSet::default()),
        });

        inner.reconcile().await?;
        info!(
            application_name = %inner.config.application_name,
            machine_address = %inner.config.machine_address,
            machine_name = %inner.config.machine_name,
            "Machine started"
        );

        let shutdown = CancellationToken::new();
        let span = info_span!("machine", machine_name = %inner.config.machine_name);
        let handle = tokio::spawn(inner.clone().reconcile_loop(shutdown.clone()).instrument(span));

        Ok(Machine {
            inner,
            handle: StdMutex::new(Some(handle)),
            shutdown,
        })
    }

    /// Runs one reconciliation pass.
    pub async fn reconcile(&self) -> Result<()> {
        self.inner.reconcile().await
    }

    /// Snapshot of the running workers, ordered by id.
    pub async fn workers(&self) -> Vec<Arc<Worker>> {
        self.inner.workers.lock().await.running.values().cloned().collect()
    }

    pub async fn worker(&self, id: i64) -> Option<Arc<Worker>> {
        self.inner.workers.lock().await.running.get(&id).cloned()
    }

    /// Stops reconciling and disposes every worker.
    ///
    /// Without `force`, in-flight jobs are allowed to finish.
    pub async fn dispose(&self, force: bool) {
        self.shutdown.cancel();
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Machine reconciliation loop panicked");
            }
        }

        let workers: Vec<_> = {
            let mut workers = self.inner.workers.lock().await;
            workers.closed = true;
            std::mem::take(&mut workers.running).into_values().collect()
        };
        join_all(workers.iter().map(|worker| worker.dispose(force))).await;
        info!(force, disposed = workers.len(), "Machine disposed");
    }

    /// Waits for a process shutdown signal, then disposes the machine.
    pub async fn run_until_shutdown(&self, force: bool) {
        shutdown_signal().await;
        self.dispose(force).await;
    }
}

impl MachineInner {
    async fn reconcile_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(jittered(self.config.machine_heartbeat)) => {}
            }

            if let Err(e) = self.reconcile().await {
                error!(error = %e, "Machine reconciliation failed");
            }
        }
        debug!("Reconciliation loop exited");
    }

    fn worker_params(&self, record: WorkerRecord) -> WorkerParams {
        WorkerParams::new(record, self.store.clone(), self.registry.clone())
            .heartbeat(self.config.worker_heartbeat)
            .scheduler_enabled(self.config.scheduler_enabled)
            .schedule_lock_timeout(self.config.schedule_lock_timeout)
            .hooks(self.hooks.clone())
            .clock(self.clock.clone())
    }

    async fn reconcile(&self) -> Result<()> {
        let config = &self.config;
        let records = self
            .store
            .get_workers(&config.application_name, &config.machine_address, &config.machine_name)
            .await?;
        let record_ids: BTreeSet<i64> = records.iter().map(|r| r.id).collect();

        // Store calls and worker start/dispose run without the lock.
        let (gone, new_records, create_default) = {
            let mut workers = self.workers.lock().await;
            if workers.closed {
                return Ok(());
            }

            let gone_ids: Vec<i64> = workers
                .running
                .keys()
                .filter(|id| !record_ids.contains(id))
                .copied()
                .collect();
            let gone: Vec<Arc<Worker>> = gone_ids
                .iter()
                .filter_map(|id| workers.running.remove(id))
                .collect();

            let new_records: Vec<WorkerRecord> = records
                .into_iter()
                .filter(|r| !workers.running.contains_key(&r.id) && !workers.pending.contains(&r.id))
                .collect();
            workers.pending.extend(new_records.iter().map(|r| r.id));

            let create_default = config.ensure_default_worker
                && workers.running.is_empty()
                && workers.pending.is_empty()
                && !workers.creating_default;
            workers.creating_default |= create_default;

            (gone, new_records, create_default)
        };

        for worker in &gone {
            info!(worker_id = worker.id(), "Worker record removed, disposing worker");
            worker.dispose(false).await;
        }

        let mut started = Vec::new();
        for record in new_records {
            let autostart = record.status == WorkerStatus::Working
                || record.startup == WorkerStartupType::Automatic;
            let worker = Arc::new(Worker::new(self.worker_params(record)));
            if autostart {
                worker.start().await;
                started.push(worker.id());
            }
            self.adopt(worker, |workers, id| {
                workers.pending.remove(&id);
            })
            .await;
        }

        if create_default {
            let record = match self.create_default_record().await {
                Ok(record) => record,
                Err(e) => {
                    self.workers.lock().await.creating_default = false;
                    return Err(e);
                }
            };
            info!(worker_id = record.id, "Created default worker");

            let worker = Arc::new(Worker::new(self.worker_params(record)));
            worker.start().await;
            started.push(worker.id());
            self.adopt(worker, |workers, _| workers.creating_default = false)
                .await;
        }

        let count = self.workers.lock().await.running.len();
        if !started.is_empty() || !gone.is_empty() {
            debug!(started = ?started, disposed = gone.len(), workers = count, "Reconciled workers");
        }
        self.hooks
            .emit(MachineReconcileContext {
                machine_address: config.machine_address.clone(),
                machine_name: config.machine_name.clone(),
                started,
                disposed: gone.iter().map(|w| w.id()).collect(),
                workers: count,
            })
            .await;
        Ok(())
    }

    async fn create_default_record(&self) -> Result<WorkerRecord> {
        let config = &self.config;
        let record = self
            .store
            .create_worker(
                NewWorkerRecord::builder()
                    .application_name(config.application_name.clone())
                    .name(DEFAULT_WORKER_NAME)
                    .machine_address(config.machine_address.clone())
                    .machine_name(config.machine_name.clone())
                    .status(WorkerStatus::Working)
                    .startup(WorkerStartupType::Automatic)
                    .build(),
            )
            .await?;
        Ok(record)
    }

    /// Inserts a started worker, or disposes it if the machine was disposed meanwhile.
    async fn adopt(&self, worker: Arc<Worker>, release: impl FnOnce(&mut WorkerSet, i64)) {
        let closed = {
            let mut workers = self.workers.lock().await;
            release(&mut *workers, worker.id());
            if !workers.closed {
                workers.running.insert(worker.id(), worker.clone());
            }
            workers.closed
        };
        if closed {
            worker.dispose(false).await;
        }
    }
}
