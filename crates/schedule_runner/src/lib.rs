mod date;
mod scheduler;

use foreman_store::StoreError;
use thiserror::Error;

pub use date::calculate_schedule_date;
pub use scheduler::Scheduler;

/// Default age after which a schedule's enqueueing lock is considered abandoned.
pub const DEFAULT_LOCK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Store error while evaluating schedules: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid schedule window: {0}")]
    InvalidWindow(String),
}

pub type Result<T> = core::result::Result<T, ScheduleError>;
