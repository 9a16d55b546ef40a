use std::future::Future;

use futures::future::BoxFuture;

use crate::event::{Event, ObserverFn};
use crate::plugin::Plugin;
use crate::TypeErasedHooks;

/// Observers of worker, scheduler and machine events.
///
/// Handlers are awaited by the emitting loop but cannot change what it does.
///
/// ```
/// use foreman_lifecycle_hooks::{HookRegistry, JobComplete};
///
/// let mut hooks = HookRegistry::new();
/// hooks.on(JobComplete, |ctx| async move {
///     println!("{} finished with {}", ctx.job.job_name, ctx.status);
/// });
/// ```
#[derive(Default)]
pub struct HookRegistry {
    pub(crate) inner: TypeErasedHooks,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<E, F, Fut>(&mut self, _event: E, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(E::Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: ObserverFn<E::Context> =
            Box::new(move |ctx| -> BoxFuture<'static, ()> { Box::pin(handler(ctx)) });
        E::register_boxed(&mut self.inner, boxed);
        self
    }

    pub fn with_plugin<P: Plugin>(mut self, plugin: P) -> Self {
        plugin.register(&mut self);
        self
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("events", &self.inner.len())
            .finish()
    }
}
