//! Hook table and fire-and-forget event dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dockhand_module_sdk::{Event, EventType, Hook};
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

#[derive(Clone)]
struct RegisteredHook {
    module: String,
    hook: Hook,
}

/// Dispatches events to hooks on the tokio runtime.
///
/// Every invocation runs in its own task and must hold a permit from a
/// shared semaphore, which caps how many handlers run at once.
pub struct HookDispatcher {
    table: RwLock<HashMap<EventType, Vec<RegisteredHook>>>,
    permits: RwLock<Arc<Semaphore>>,
}

impl HookDispatcher {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            table: RwLock::new(HashMap::new()),
            permits: RwLock::new(Arc::new(Semaphore::new(max_concurrent.max(1)))),
        }
    }

    /// Resize the pool. In-flight handlers keep their old permits.
    pub fn set_max_concurrency(&self, max_concurrent: usize) {
        *self.permits.write() = Arc::new(Semaphore::new(max_concurrent.max(1)));
    }

    /// Append a module's hooks to the table.
    pub fn register(&self, module: &str, hooks: Vec<Hook>) -> usize {
        let count = hooks.len();
        let mut table = self.table.write();
        for hook in hooks {
            table.entry(hook.event_type).or_default().push(RegisteredHook {
                module: module.to_string(),
                hook,
            });
        }
        if count > 0 {
            tracing::debug!(module = %module, hooks = count, "Registered hooks");
        }
        count
    }

    /// Drop every hook owned by `module`.
    pub fn remove_module(&self, module: &str) -> usize {
        let mut removed = 0;
        let mut table = self.table.write();
        table.retain(|_, hooks| {
            let before = hooks.len();
            hooks.retain(|h| h.module != module);
            removed += before - hooks.len();
            !hooks.is_empty()
        });
        removed
    }

    pub fn clear(&self) {
        self.table.write().clear();
    }

    pub fn hook_count(&self, event_type: EventType) -> usize {
        self.table.read().get(&event_type).map_or(0, Vec::len)
    }

    pub fn total_hooks(&self) -> usize {
        self.table.read().values().map(Vec::len).sum()
    }

    /// Build an event from `data` and dispatch it.
    pub fn fire(&self, event_type: EventType, data: HashMap<String, Value>) -> usize {
        let mut event = Event::new(event_type);
        event.data = data;
        self.fire_event(event)
    }

    /// Spawn one task per matching hook and return without waiting.
    ///
    /// Returns the number of hooks dispatched. Handler errors and panics
    /// are logged and never reach the caller.
    pub fn fire_event(&self, event: Event) -> usize {
        let hooks = match self.table.read().get(&event.event_type) {
            Some(hooks) if !hooks.is_empty() => hooks.clone(),
            _ => return 0,
        };

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(event = %event.event_type, "No async runtime, dropping event");
                return 0;
            }
        };

        let permits = self.permits.read().clone();
        let event = Arc::new(event);
        let dispatched = hooks.len();

        for registered in hooks {
            let permits = permits.clone();
            let event = event.clone();
            handle.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let event_type = event.event_type;
                let hook = registered.hook;
                let run = async move { hook.invoke(event).await };
                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(
                            module = %registered.module,
                            event = %event_type,
                            error = %e,
                            "Hook handler failed"
                        );
                    }
                    Err(_) => {
                        tracing::error!(
                            module = %registered.module,
                            event = %event_type,
                            "Hook handler panicked"
                        );
                    }
                }
            });
        }

        tracing::debug!(event = %event.event_type, hooks = dispatched, "Event dispatched");
        dispatched
    }
}

impl Default for HookDispatcher {
    fn default() -> Self {
        Self::new(crate::config::defaults::MAX_CONCURRENT_HOOKS)
    }
}
