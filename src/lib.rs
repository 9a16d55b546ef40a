//! Persistent-store-backed job queue with distributed workers and recurring schedules.
//!
//! Processes coordinate only through a shared [`Store`]: each [`Machine`]
//! runs the workers assigned to it, each [`Worker`] claims and executes due
//! jobs and enqueues the due occurrences of recurring schedules, and the
//! [`ControlPlane`] steers them by writing records and signals.
//!
//! ```no_run
//! use std::sync::Arc;
//! use foreman::{JobContext, JobHandler, JobRegistry, IntoJobResult, Machine, MachineOptions, MemoryStore};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Deserialize, Serialize)]
//! struct SendReport {
//!     recipient: String,
//! }
//!
//! impl JobHandler for SendReport {
//!     const JOB_TYPE: &'static str = "send_report";
//!
//!     async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
//!         println!("sending report to {}", self.recipient);
//!     }
//! }
//!
//! # async fn run() -> foreman::Result<()> {
//! let registry = Arc::new(JobRegistry::new().register::<SendReport>());
//! let store = Arc::new(MemoryStore::new());
//! let machine = Machine::start(MachineOptions::default(), store, registry).await?;
//! machine.run_until_shutdown(false).await;
//! # Ok(())
//! # }
//! ```

mod control_plane;
pub mod errors;
mod machine;
mod options;
mod utils;
mod worker;

pub use control_plane::ControlPlane;
pub use errors::{ForemanError, Result};
pub use machine::Machine;
pub use options::{MachineOptions, DEFAULT_WORKER_NAME};
pub use worker::{Worker, WorkerParams};

pub use foreman_job::*;
pub use foreman_queue_filters::QueueNameFilters;
pub use foreman_schedule_runner::{calculate_schedule_date, Scheduler};
pub use foreman_store::clock::{Clock, SystemClock};
pub use foreman_store::{MemoryStore, Store, StoreError};
pub use foreman_task_handler::{
    IntoJobResult, JobContext, JobHandler, JobRegistry, RegistryError, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_MS,
};

pub use foreman_lifecycle_hooks as lifecycle_hooks;
pub use foreman_shutdown_signal::shutdown_signal;

#[cfg(feature = "postgres")]
pub use foreman_pg_store::{PgStore, PgStoreError, PgStoreOptions};
