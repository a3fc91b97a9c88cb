//! Lifecycle events and hook registrations.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModuleResult;

/// Kinds of events the host dispatches to hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    PreCommand,
    PostCommand,
    WorkspaceChange,
    HostChange,
    ServiceStart,
    ServiceStop,
    Error,
    ModuleLoaded,
    ModuleUnloaded,
    ConfigChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreCommand => "pre-command",
            Self::PostCommand => "post-command",
            Self::WorkspaceChange => "workspace-change",
            Self::HostChange => "host-change",
            Self::ServiceStart => "service-start",
            Self::ServiceStop => "service-stop",
            Self::Error => "error",
            Self::ModuleLoaded => "module-loaded",
            Self::ModuleUnloaded => "module-unloaded",
            Self::ConfigChanged => "config-changed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event delivered to hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Async handler run for a matching event.
pub type HookHandler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, ModuleResult<()>> + Send + Sync>;

/// A handler subscribed to one event type.
#[derive(Clone)]
pub struct Hook {
    pub event_type: EventType,
    handler: HookHandler,
}

impl Hook {
    pub fn new<F, Fut>(event_type: EventType, handler: F) -> Self
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ModuleResult<()>> + Send + 'static,
    {
        Self {
            event_type,
            handler: Arc::new(move |event| handler(event).boxed()),
        }
    }

    pub fn invoke(&self, event: Arc<Event>) -> BoxFuture<'static, ModuleResult<()>> {
        (self.handler)(event)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("event_type", &self.event_type)
            .finish_non_exhaustive()
    }
}
