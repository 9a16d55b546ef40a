use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use foreman_lifecycle_hooks::{Event, HookRegistry, Plugin};
use foreman_schedule_runner::DEFAULT_LOCK_TIMEOUT;
use foreman_store::clock::{Clock, SystemClock};

use crate::errors::{ForemanError, Result};

/// Name given to the worker record created when a machine has none.
pub const DEFAULT_WORKER_NAME: &str = "Default";

/// Configuration of a [`Machine`](crate::Machine) and of the workers it runs.
///
/// # Example
///
/// ```
/// use foreman::MachineOptions;
/// use foreman::lifecycle_hooks::JobComplete;
/// use std::time::Duration;
///
/// let options = MachineOptions::default()
///     .application_name("billing")
///     .machine_address("10.0.0.12")
///     .machine_name("billing-1")
///     .worker_heartbeat(Duration::from_secs(5))
///     .on(JobComplete, |ctx| async move {
///         println!("job {} ended as {}", ctx.job.id, ctx.status);
///     });
/// ```
pub struct MachineOptions {
    application_name: String,
    /// Network address identifying this machine in worker records
    machine_address: String,
    /// Host name identifying this machine in worker records
    machine_name: String,
    /// Base interval of the reconciliation loop
    machine_heartbeat: Duration,
    /// Base interval of each worker's polling and control loops
    worker_heartbeat: Duration,
    scheduler_enabled: bool,
    /// Create and start a `Default` worker when the machine has no worker record
    ensure_default_worker: bool,
    /// Age after which a schedule's enqueueing lock is overridden
    schedule_lock_timeout: Duration,
    hooks: HookRegistry,
    clock: Arc<dyn Clock>,
}

impl Default for MachineOptions {
    fn default() -> Self {
        MachineOptions {
            application_name: String::from("foreman"),
            machine_address: String::from("127.0.0.1"),
            machine_name: String::from("localhost"),
            machine_heartbeat: Duration::from_secs(30),
            worker_heartbeat: Duration::from_secs(10),
            scheduler_enabled: true,
            ensure_default_worker: true,
            schedule_lock_timeout: DEFAULT_LOCK_TIMEOUT,
            hooks: HookRegistry::default(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for MachineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineOptions")
            .field("application_name", &self.application_name)
            .field("machine_address", &self.machine_address)
            .field("machine_name", &self.machine_name)
            .field("machine_heartbeat", &self.machine_heartbeat)
            .field("worker_heartbeat", &self.worker_heartbeat)
            .field("scheduler_enabled", &self.scheduler_enabled)
            .field("ensure_default_worker", &self.ensure_default_worker)
            .field("schedule_lock_timeout", &self.schedule_lock_timeout)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl MachineOptions {
    pub fn application_name(mut self, value: &str) -> Self {
        self.application_name = value.into();
        self
    }

    pub fn machine_address(mut self, value: &str) -> Self {
        self.machine_address = value.into();
        self
    }

    pub fn machine_name(mut self, value: &str) -> Self {
        self.machine_name = value.into();
        self
    }

    /// Defaults to 30 seconds.
    pub fn machine_heartbeat(mut self, value: Duration) -> Self {
        self.machine_heartbeat = value;
        self
    }

    /// Defaults to 10 seconds. Also the width of a scheduler's first window.
    pub fn worker_heartbeat(mut self, value: Duration) -> Self {
        self.worker_heartbeat = value;
        self
    }

    pub fn scheduler_enabled(mut self, value: bool) -> Self {
        self.scheduler_enabled = value;
        self
    }

    pub fn ensure_default_worker(mut self, value: bool) -> Self {
        self.ensure_default_worker = value;
        self
    }

    /// Defaults to 60 seconds.
    pub fn schedule_lock_timeout(mut self, value: Duration) -> Self {
        self.schedule_lock_timeout = value;
        self
    }

    /// Time source of the workers and schedulers. Defaults to the system clock.
    pub fn clock(mut self, value: Arc<dyn Clock>) -> Self {
        self.clock = value;
        self
    }

    /// Registers an observer for one lifecycle event.
    pub fn on<E, F, Fut>(mut self, event: E, handler: F) -> Self
    where
        E: Event,
        F: Fn(E::Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on(event, handler);
        self
    }

    /// Registers every observer of `plugin`.
    pub fn add_plugin<P: Plugin>(mut self, plugin: P) -> Self {
        self.hooks = self.hooks.with_plugin(plugin);
        self
    }

    pub(crate) fn into_parts(self) -> (MachineConfig, HookRegistry, Arc<dyn Clock>) {
        let config = MachineConfig {
            application_name: self.application_name,
            machine_address: self.machine_address,
            machine_name: self.machine_name,
            machine_heartbeat: self.machine_heartbeat,
            worker_heartbeat: self.worker_heartbeat,
            scheduler_enabled: self.scheduler_enabled,
            ensure_default_worker: self.ensure_default_worker,
            schedule_lock_timeout: self.schedule_lock_timeout,
        };
        (config, self.hooks, self.clock)
    }
}

/// The plain values of [`MachineOptions`], kept by a running machine.
#[derive(Debug, Clone)]
pub(crate) struct MachineConfig {
    pub(crate) application_name: String,
    pub(crate) machine_address: String,
    pub(crate) machine_name: String,
    pub(crate) machine_heartbeat: Duration,
    pub(crate) worker_heartbeat: Duration,
    pub(crate) scheduler_enabled: bool,
    pub(crate) ensure_default_worker: bool,
    pub(crate) schedule_lock_timeout: Duration,
}

impl MachineConfig {
    /// Rejects values the loops cannot run with.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.machine_heartbeat.is_zero() {
            return Err(invalid("machine_heartbeat", "must be greater than zero"));
        }
        if self.worker_heartbeat.is_zero() {
            return Err(invalid("worker_heartbeat", "must be greater than zero"));
        }
        for (name, value) in [
            ("worker_heartbeat", self.worker_heartbeat),
            ("schedule_lock_timeout", self.schedule_lock_timeout),
        ] {
            chrono::Duration::from_std(value).map_err(|e| invalid(name, &e.to_string()))?;
        }
        Ok(())
    }
}

fn invalid(name: &'static str, reason: &str) -> ForemanError {
    ForemanError::InvalidOption {
        name,
        reason: reason.to_string(),
    }
}
