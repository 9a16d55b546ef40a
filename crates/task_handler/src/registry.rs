use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use getset::Getters;
use thiserror::Error;

use crate::{effective_timeout, IntoJobResult, JobContext, JobHandler};

/// A deserialized job body, ready to run once.
pub type JobFn = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, Result<(), String>> + Send>;

type Factory = Box<dyn Fn(&str) -> Result<PreparedJob, serde_json::Error> + Send + Sync>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No job registered for type '{0}'")]
    UnknownJobType(String),

    #[error("Could not deserialize data of job type '{job_type}': {source}")]
    InvalidData {
        job_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Maps job type identifiers to the code that deserializes and runs them.
///
/// Populated once at startup and shared by every worker of the process.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, Factory>,
}

impl Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `T::JOB_TYPE`, replacing any previous registration.
    ///
    /// ```
    /// # use foreman_task_handler::{IntoJobResult, JobContext, JobHandler, JobRegistry};
    /// # use serde::{Deserialize, Serialize};
    /// #[derive(Deserialize, Serialize)]
    /// struct Cleanup;
    ///
    /// impl JobHandler for Cleanup {
    ///     const JOB_TYPE: &'static str = "cleanup";
    ///     async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {}
    /// }
    ///
    /// let registry = JobRegistry::new().register::<Cleanup>();
    /// assert!(registry.contains("cleanup"));
    /// ```
    pub fn register<T: JobHandler>(mut self) -> Self {
        let factory = |data: &str| -> Result<PreparedJob, serde_json::Error> {
            let job: T = serde_json::from_str(data)?;
            Ok(PreparedJob {
                name: job.name(),
                retries: job.retries(),
                timeout_ms: job.timeout_ms(),
                run: Box::new(move |ctx: JobContext| {
                    async move { job.execute(ctx).await.into_job_result() }.boxed()
                }),
            })
        };

        self.factories
            .insert(T::JOB_TYPE.to_string(), Box::new(factory));
        self
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    pub fn job_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Deserializes `data` into the job registered for `job_type`.
    pub fn prepare(&self, job_type: &str, data: &str) -> Result<PreparedJob, RegistryError> {
        let factory = self
            .factories
            .get(job_type)
            .ok_or_else(|| RegistryError::UnknownJobType(job_type.to_string()))?;

        factory(data).map_err(|source| RegistryError::InvalidData {
            job_type: job_type.to_string(),
            source,
        })
    }
}

/// A job whose data was deserialized, together with its own settings.
#[derive(Getters)]
#[getset(get = "pub")]
pub struct PreparedJob {
    name: String,
    retries: i32,
    timeout_ms: i64,
    #[getset(skip)]
    pub(crate) run: JobFn,
}

impl PreparedJob {
    pub fn timeout(&self) -> Option<Duration> {
        effective_timeout(self.timeout_ms)
    }
}

impl Debug for PreparedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedJob")
            .field("name", &self.name)
            .field("retries", &self.retries)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Serialize)]
    struct Resize {
        width: u32,
    }

    impl JobHandler for Resize {
        const JOB_TYPE: &'static str = "resize";

        fn name(&self) -> String {
            format!("Resize to {}", self.width)
        }

        fn retries(&self) -> i32 {
            -1
        }

        fn timeout_ms(&self) -> i64 {
            0
        }

        async fn execute(self, _ctx: JobContext) -> impl IntoJobResult {
            if self.width == 0 {
                return Err("width must be positive".to_string());
            }
            Ok(())
        }
    }

    #[test]
    fn prepare_reads_job_settings_from_data() {
        let registry = JobRegistry::new().register::<Resize>();
        let job = registry.prepare("resize", r#"{"width": 40}"#).unwrap();

        assert_eq!(job.name(), "Resize to 40");
        assert_eq!(*job.retries(), -1);
        assert_eq!(job.timeout(), None);
    }

    #[test]
    fn unknown_job_type() {
        let registry = JobRegistry::new().register::<Resize>();
        let err = registry.prepare("crop", "{}").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownJobType(t) if t == "crop"));
    }

    #[test]
    fn invalid_data() {
        let registry = JobRegistry::new().register::<Resize>();
        let err = registry.prepare("resize", r#"{"height": 1}"#).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidData { .. }));
        assert!(err.to_string().starts_with("Could not deserialize data of job type 'resize'"));
    }
}
