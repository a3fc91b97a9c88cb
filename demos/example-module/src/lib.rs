//! Example Dockhand module.
//!
//! Publishes a few string tools and counts `post-command` events.
//!
//! Build with `cargo build --release` and copy the resulting library into
//! one of the configured search paths.
//!
//! # Settings
//!
//! - `prefix`: string prepended to every `echo` result
//! - `max_input`: inputs longer than this are rejected (default 4096)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dockhand_module_sdk::prelude::*;

const DEFAULT_MAX_INPUT: usize = 4096;

#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    rejected: AtomicU64,
    commands: AtomicU64,
}

/// Module instance state.
pub struct TextTools {
    prefix: String,
    max_input: usize,
    counters: Arc<Counters>,
}

impl Default for TextTools {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            max_input: DEFAULT_MAX_INPUT,
            counters: Arc::new(Counters::default()),
        }
    }
}

impl TextTools {
    fn tool<F>(&self, name: &str, description: &str, transform: F) -> ToolSpec
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let counters = self.counters.clone();
        let max_input = self.max_input;
        let transform = Arc::new(transform);
        ToolSpec::new(format!("text.{}", name), description, move |args: Value| {
            let counters = counters.clone();
            let transform = transform.clone();
            async move {
                let input = args.get("input").and_then(|v| v.as_str()).unwrap_or("");
                if input.len() > max_input {
                    counters.rejected.fetch_add(1, Ordering::Relaxed);
                    return Err(ModuleError::ExecutionFailed(format!(
                        "input exceeds {} bytes",
                        max_input
                    )));
                }
                let count = counters.requests.fetch_add(1, Ordering::Relaxed);
                Ok(json!({
                    "result": transform(input),
                    "request_number": count,
                }))
            }
        })
        .with_input_schema(json!({
            "type": "object",
            "properties": { "input": { "type": "string" } },
            "required": ["input"],
        }))
    }
}

#[async_trait]
impl Module for TextTools {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new("text-tools", env!("CARGO_PKG_VERSION"))
            .with_description("String transformation tools")
            .with_author("Dockhand Contributors")
            .with_license("Apache-2.0")
            .with_tag("integration")
            .with_min_host_version("0.3.0")
    }

    async fn initialize(&mut self, config: &ModuleConfig) -> ModuleResult<()> {
        if let Some(prefix) = config.get_str("prefix") {
            self.prefix = prefix.to_string();
        }
        if let Some(max_input) = config.get::<usize>("max_input") {
            if max_input == 0 {
                return Err(ModuleError::InvalidConfig("max_input must be positive".into()));
            }
            self.max_input = max_input;
        }
        Ok(())
    }

    fn tools(&self) -> Vec<ToolSpec> {
        let prefix = self.prefix.clone();
        vec![
            self.tool("echo", "Return the input unchanged", move |s| {
                format!("{}{}", prefix, s)
            }),
            self.tool("reverse", "Reverse the input string", |s| s.chars().rev().collect()),
            self.tool("uppercase", "Convert the input to uppercase", str::to_uppercase),
            self.tool("lowercase", "Convert the input to lowercase", str::to_lowercase),
        ]
    }

    fn hooks(&self) -> Vec<Hook> {
        let counters = self.counters.clone();
        vec![Hook::new(EventType::PostCommand, move |_event| {
            counters.commands.fetch_add(1, Ordering::Relaxed);
            async { Ok(()) }
        })]
    }

    async fn health(&self) -> HealthStatus {
        let requests = self.counters.requests.load(Ordering::Relaxed);
        let rejected = self.counters.rejected.load(Ordering::Relaxed);
        let status = if rejected > requests && rejected > 10 {
            HealthStatus::degraded("most requests rejected")
        } else {
            HealthStatus::healthy()
        };
        status
            .with_detail("requests", json!(requests))
            .with_detail("rejected", json!(rejected))
            .with_detail(
                "commands",
                json!(self.counters.commands.load(Ordering::Relaxed)),
            )
    }
}

export_module!(TextTools);
