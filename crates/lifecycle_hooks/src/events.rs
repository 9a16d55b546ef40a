#![allow(private_interfaces)]

use futures::future::BoxFuture;

use crate::context::{
    JobCompleteContext, JobStartContext, MachineReconcileContext, ScheduleEnqueuedContext,
    WorkerStartContext, WorkerStopContext,
};
use crate::event::{Event, ObserverFn};
use crate::TypeErasedHooks;

#[doc(hidden)]
pub trait Emittable: Clone + Send + 'static {
    #[doc(hidden)]
    fn emit_to(self, hooks: &TypeErasedHooks) -> BoxFuture<'_, ()>;
}

macro_rules! define_observer_event {
    ($event:ident, $context:ty) => {
        pub struct $event;

        impl Event for $event {
            type Context = $context;

            fn register_boxed(hooks: &mut TypeErasedHooks, handler: ObserverFn<Self::Context>) {
                hooks.get_handlers_mut::<Self>().push(handler);
            }
        }

        impl Emittable for $context {
            fn emit_to(self, hooks: &TypeErasedHooks) -> BoxFuture<'_, ()> {
                Box::pin(async move {
                    if let Some(handlers) = hooks.get_handlers::<$event>() {
                        let futures: Vec<_> = handlers.iter().map(|h| h(self.clone())).collect();
                        futures::future::join_all(futures).await;
                    }
                })
            }
        }
    };
}

define_observer_event!(WorkerStart, WorkerStartContext);
define_observer_event!(WorkerStop, WorkerStopContext);
define_observer_event!(JobStart, JobStartContext);
define_observer_event!(JobComplete, JobCompleteContext);
define_observer_event!(ScheduleEnqueued, ScheduleEnqueuedContext);
define_observer_event!(MachineReconcile, MachineReconcileContext);
