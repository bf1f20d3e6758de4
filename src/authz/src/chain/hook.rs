//! Advisory pre-handle hooks
//!
//! Hooks run before any gate. They cannot allow or deny a call; an error or
//! panic inside a hook is logged and the chain carries on.

use crate::types::Principal;
use std::sync::Arc;
use tracing::info;

/// What a hook gets to see about the call
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Operation name
    pub action: &'a str,

    /// Principal as resolved by the caller, possibly absent
    pub principal: Option<&'a Principal>,
}

/// Hook run in the pre-handle stage
pub trait PreHandleHook: Send + Sync {
    fn pre_handle(&self, ctx: &HookContext<'_>) -> anyhow::Result<()>;

    /// Name used in log lines
    fn name(&self) -> &str {
        "pre-handle"
    }
}

impl<F> PreHandleHook for F
where
    F: Fn(&HookContext<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn pre_handle(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        self(ctx)
    }
}

/// Built-in hook installed at the declaration's pre-handle order
#[derive(Debug, Clone, Copy)]
pub struct TracingPreHandle {
    order: i32,
}

impl TracingPreHandle {
    pub fn new(order: i32) -> Self {
        Self { order }
    }
}

impl PreHandleHook for TracingPreHandle {
    fn pre_handle(&self, ctx: &HookContext<'_>) -> anyhow::Result<()> {
        info!(
            "Executing pre-handle - operation: {}, user: {}, priority: {}",
            ctx.action,
            ctx.principal.map(|p| p.id.as_str()).unwrap_or("anonymous"),
            self.order
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Hook plus its sort key
#[derive(Clone)]
pub(crate) struct RegisteredHook {
    pub(crate) order: i32,
    pub(crate) hook: Arc<dyn PreHandleHook>,
}

/// Stable sort: equal orders keep registration order
pub(crate) fn sort_hooks(hooks: &mut [RegisteredHook]) {
    hooks.sort_by_key(|h| h.order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Named(&'static str);

    impl PreHandleHook for Named {
        fn pre_handle(&self, _ctx: &HookContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_sort_is_stable() {
        let registered = |order: i32, name: &'static str| RegisteredHook {
            order,
            hook: Arc::new(Named(name)),
        };
        let mut hooks = vec![
            registered(5, "late"),
            registered(0, "first"),
            registered(0, "second"),
            registered(-1, "earliest"),
        ];

        sort_hooks(&mut hooks);
        let names: Vec<&str> = hooks.iter().map(|h| h.hook.name()).collect();
        assert_eq!(names, vec!["earliest", "first", "second", "late"]);
    }

    #[test]
    fn test_closure_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook = move |ctx: &HookContext<'_>| -> anyhow::Result<()> {
            sink.lock().push(ctx.action.to_string());
            Ok(())
        };

        let principal = Principal::new("alice");
        hook.pre_handle(&HookContext {
            action: "hello",
            principal: Some(&principal),
        })
        .unwrap();

        assert_eq!(*seen.lock(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_tracing_hook_never_fails() {
        let hook = TracingPreHandle::new(3);
        let ctx = HookContext {
            action: "hello",
            principal: None,
        };
        assert!(hook.pre_handle(&ctx).is_ok());
        assert_eq!(hook.name(), "tracing");
    }
}
