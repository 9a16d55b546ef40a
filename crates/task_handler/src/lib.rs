mod context;
mod handler;
mod registry;
mod runner;

pub use context::JobContext;
pub use handler::{
    effective_timeout, should_retry, IntoJobResult, JobHandler, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_MS,
};
pub use registry::{JobFn, JobRegistry, PreparedJob, RegistryError};
pub use runner::{RunJobError, SpawnJobResult};
