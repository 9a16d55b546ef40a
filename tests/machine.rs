use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use foreman::lifecycle_hooks::{JobComplete, MachineReconcile, WorkerStart};
use foreman::{
    ControlPlane, HistoryStatus, Machine, MachineOptions, MemoryStore, NewWorkerRecord, Store,
    WorkerStartupType, WorkerStatus, DEFAULT_WORKER_NAME,
};

use crate::helpers::{
    registry, wait_for_history, Succeed, APP, HEARTBEAT, MACHINE_ADDRESS, MACHINE_NAME,
};

mod helpers;

fn options() -> MachineOptions {
    MachineOptions::default()
        .application_name(APP)
        .machine_address(MACHINE_ADDRESS)
        .machine_name(MACHINE_NAME)
        .machine_heartbeat(Duration::from_millis(50))
        .worker_heartbeat(HEARTBEAT)
        .scheduler_enabled(false)
}

fn record(name: &str, startup: WorkerStartupType) -> NewWorkerRecord {
    NewWorkerRecord::builder()
        .application_name(APP)
        .name(name)
        .machine_address(MACHINE_ADDRESS)
        .machine_name(MACHINE_NAME)
        .startup(startup)
        .build()
}

#[tokio::test]
async fn creates_a_default_worker_when_none_exist() {
    let store = Arc::new(MemoryStore::new());
    let machine = Machine::start(options(), store.clone(), registry())
        .await
        .unwrap();

    let workers = machine.workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].name(), DEFAULT_WORKER_NAME);
    assert_eq!(workers[0].status().await, WorkerStatus::Working);

    let records = store
        .get_workers(APP, MACHINE_ADDRESS, MACHINE_NAME)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, DEFAULT_WORKER_NAME);
    assert_eq!(records[0].queue_names, "*");
    assert_eq!(records[0].status, WorkerStatus::Working);
    assert_eq!(records[0].startup, WorkerStartupType::Automatic);

    machine.dispose(false).await;
}

#[tokio::test]
async fn default_worker_can_be_disabled() {
    let store = Arc::new(MemoryStore::new());
    let machine = Machine::start(options().ensure_default_worker(false), store.clone(), registry())
        .await
        .unwrap();

    assert!(machine.workers().await.is_empty());
    assert!(store
        .get_workers(APP, MACHINE_ADDRESS, MACHINE_NAME)
        .await
        .unwrap()
        .is_empty());

    machine.dispose(false).await;
}

#[tokio::test]
async fn starts_automatic_workers_only() {
    let store = Arc::new(MemoryStore::new());
    let automatic = store
        .create_worker(record("auto", WorkerStartupType::Automatic))
        .await
        .unwrap();
    let manual = store
        .create_worker(record("manual", WorkerStartupType::Manual))
        .await
        .unwrap();
    store
        .create_worker(
            NewWorkerRecord::builder()
                .application_name(APP)
                .name("elsewhere")
                .machine_address("10.0.0.99")
                .machine_name("host-99")
                .build(),
        )
        .await
        .unwrap();

    let machine = Machine::start(options(), store.clone(), registry())
        .await
        .unwrap();

    let workers = machine.workers().await;
    assert_eq!(workers.len(), 2);
    let auto_worker = machine.worker(automatic.id).await.unwrap();
    let manual_worker = machine.worker(manual.id).await.unwrap();
    assert_eq!(auto_worker.status().await, WorkerStatus::Working);
    assert_eq!(manual_worker.status().await, WorkerStatus::Stopped);

    machine.dispose(false).await;
}

#[tokio::test]
async fn follows_created_and_deleted_records() {
    let store = Arc::new(MemoryStore::new());
    let control = ControlPlane::new(APP, store.clone());
    let options = options()
        .ensure_default_worker(false)
        .machine_heartbeat(Duration::from_secs(3600));
    let machine = Machine::start(options, store.clone(), registry())
        .await
        .unwrap();
    assert!(machine.workers().await.is_empty());

    let created = control
        .create_worker(record("extra", WorkerStartupType::Automatic))
        .await
        .unwrap();
    machine.reconcile().await.unwrap();
    let worker = machine.worker(created.id).await.unwrap();
    assert_eq!(worker.status().await, WorkerStatus::Working);

    assert!(control.delete_worker(created.id).await.unwrap());
    machine.reconcile().await.unwrap();
    assert!(machine.worker(created.id).await.is_none());
    assert_eq!(worker.status().await, WorkerStatus::Stopped);

    machine.dispose(false).await;
}

#[tokio::test]
async fn worker_start_hooks_can_read_the_machine_during_reconcile() {
    let machine_cell: Arc<OnceLock<Arc<Machine>>> = Arc::new(OnceLock::new());
    let inspected = Arc::new(AtomicUsize::new(0));

    let options = options()
        .ensure_default_worker(false)
        .machine_heartbeat(Duration::from_secs(3600))
        .on(WorkerStart, {
            let machine_cell = machine_cell.clone();
            let inspected = inspected.clone();
            move |_ctx| {
                let machine = machine_cell.get().cloned();
                let inspected = inspected.clone();
                async move {
                    if let Some(machine) = machine {
                        let workers = tokio::time::timeout(Duration::from_secs(1), machine.workers())
                            .await
                            .expect("machine workers are readable while a worker starts");
                        assert!(workers.len() <= 1);
                        inspected.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

    let store = Arc::new(MemoryStore::new());
    let control = ControlPlane::new(APP, store.clone());
    let machine = Arc::new(
        Machine::start(options, store.clone(), registry())
            .await
            .unwrap(),
    );
    assert!(machine_cell.set(machine.clone()).is_ok());

    let created = control
        .create_worker(record("extra", WorkerStartupType::Automatic))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), machine.reconcile())
        .await
        .expect("reconcile finishes")
        .unwrap();

    assert_eq!(inspected.load(Ordering::SeqCst), 1);
    assert!(machine.worker(created.id).await.is_some());

    // A second pass does not start the worker again
    machine.reconcile().await.unwrap();
    assert_eq!(inspected.load(Ordering::SeqCst), 1);
    assert_eq!(machine.workers().await.len(), 1);

    machine.dispose(false).await;
}

#[tokio::test]
async fn concurrent_reconciles_start_each_record_once() {
    let started = Arc::new(AtomicUsize::new(0));
    let options = options()
        .machine_heartbeat(Duration::from_secs(3600))
        .on(WorkerStart, {
            let started = started.clone();
            move |_ctx| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

    let store = Arc::new(MemoryStore::new());
    let control = ControlPlane::new(APP, store.clone());
    let machine = Machine::start(options, store.clone(), registry())
        .await
        .unwrap();
    assert_eq!(started.load(Ordering::SeqCst), 1);

    control
        .create_worker(record("extra", WorkerStartupType::Automatic))
        .await
        .unwrap();
    let (a, b) = tokio::join!(machine.reconcile(), machine.reconcile());
    a.unwrap();
    b.unwrap();

    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(machine.workers().await.len(), 2);

    machine.dispose(false).await;
}

#[tokio::test]
async fn runs_jobs_and_reports_through_hooks() {
    let completed = Arc::new(AtomicUsize::new(0));
    let reconciled = Arc::new(AtomicUsize::new(0));

    let options = options()
        .on(JobComplete, {
            let completed = completed.clone();
            move |ctx| {
                let completed = completed.clone();
                async move {
                    if ctx.status == HistoryStatus::Succeeded {
                        completed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        })
        .on(MachineReconcile, {
            let reconciled = reconciled.clone();
            move |_ctx| {
                let reconciled = reconciled.clone();
                async move {
                    reconciled.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

    let store = Arc::new(MemoryStore::new());
    let control = ControlPlane::new(APP, store.clone());
    let machine = Machine::start(options, store.clone(), registry())
        .await
        .unwrap();

    for value in 0..3 {
        control.enqueue("default", &Succeed { value }).await.unwrap();
    }

    let history = wait_for_history(&store, 3).await;
    assert!(history.iter().all(|h| h.status == HistoryStatus::Succeeded));
    assert!(reconciled.load(Ordering::SeqCst) >= 1);

    machine.dispose(false).await;
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn dispose_stops_every_worker() {
    let store = Arc::new(MemoryStore::new());
    for name in ["a", "b"] {
        store
            .create_worker(record(name, WorkerStartupType::Automatic))
            .await
            .unwrap();
    }

    let machine = Machine::start(options(), store.clone(), registry())
        .await
        .unwrap();
    let workers = machine.workers().await;
    assert_eq!(workers.len(), 2);

    machine.dispose(false).await;

    assert!(machine.workers().await.is_empty());
    for worker in workers {
        assert_eq!(worker.status().await, WorkerStatus::Stopped);
    }
    let records = store
        .get_workers(APP, MACHINE_ADDRESS, MACHINE_NAME)
        .await
        .unwrap();
    assert!(records.iter().all(|r| r.status == WorkerStatus::Stopped));
}
