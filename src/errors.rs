use foreman_schedule_runner::ScheduleError;
use foreman_store::StoreError;
use foreman_task_handler::RegistryError;
use thiserror::Error;

/// Errors surfaced by the machine, workers and control plane.
///
/// Failures inside worker and machine loops are logged rather than returned;
/// these errors reach callers of the one-shot operations only.
#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Job data did not match any registered job type
    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Schedule(#[from] ScheduleError),

    /// An error occurred while serializing job data
    #[error("Error while serializing job data: {0}")]
    JsonSerializeError(#[from] serde_json::Error),

    /// A machine option holds a value the loops cannot run with
    #[error("Invalid option {name}: {reason}")]
    InvalidOption { name: &'static str, reason: String },

    #[cfg(feature = "postgres")]
    #[error("{0}")]
    PgStore(#[from] foreman_pg_store::PgStoreError),
}

pub type Result<T> = core::result::Result<T, ForemanError>;
