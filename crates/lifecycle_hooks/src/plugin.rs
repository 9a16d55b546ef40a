use crate::HookRegistry;

/// A bundle of hooks registered together.
pub trait Plugin: Send + Sync + 'static {
    fn register(self, hooks: &mut HookRegistry);
}
