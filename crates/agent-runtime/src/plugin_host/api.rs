//! The surface a plugin's `register` entry point is handed: tool, hook,
//! route, command, and service registration, plus a scoped logger and a
//! per-plugin config map (spec.md §4.7 step 3).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::tool_runtime::ToolRunner;
use crate::types::ToolManifest;

#[derive(Debug, Clone)]
pub enum HookVerdict {
    Continue,
    Observe,
    Modify(Value),
    Block { reason: String },
}

pub type HookFn = Arc<dyn Fn(&Value) -> Result<HookVerdict, String> + Send + Sync>;
pub type RouteHandler = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;
pub type CommandHandler = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

#[derive(Clone)]
pub struct ServiceHandle {
    pub name: String,
    pub start: Arc<dyn Fn() -> Result<(), String> + Send + Sync>,
    pub stop: Arc<dyn Fn() -> Result<(), String> + Send + Sync>,
    pub health: Arc<dyn Fn() -> bool + Send + Sync>,
}

pub(crate) struct RegisteredTool {
    pub manifest: ToolManifest,
    pub runner: Arc<dyn ToolRunner>,
}

pub(crate) struct RegisteredHook {
    pub priority: i32,
    pub func: HookFn,
}

pub(crate) struct RegisteredRoute {
    pub method: String,
    pub path: String,
    pub handler: RouteHandler,
}

/// Accumulates one plugin's registrations during its `register(&mut api)`
/// call. A fresh `PluginApi` is built per load attempt and its contents are
/// merged into the host's tables only after `register` returns
/// successfully — a plugin that panics mid-registration leaves nothing
/// half-installed.
pub struct PluginApi {
    pub(crate) plugin_id: String,
    pub(crate) tools: Vec<(String, RegisteredTool)>,
    pub(crate) hooks: Vec<(String, RegisteredHook)>,
    pub(crate) routes: Vec<RegisteredRoute>,
    pub(crate) commands: Vec<(String, CommandHandler)>,
    pub(crate) services: Vec<ServiceHandle>,
    pub(crate) config: HashMap<String, Value>,
}

impl PluginApi {
    pub fn new(plugin_id: impl Into<String>, config: HashMap<String, Value>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            tools: Vec::new(),
            hooks: Vec::new(),
            routes: Vec::new(),
            commands: Vec::new(),
            services: Vec::new(),
            config,
        }
    }

    pub fn register_tool(&mut self, manifest: ToolManifest, runner: Arc<dyn ToolRunner>) {
        let name = manifest.name.clone();
        self.tools.push((name, RegisteredTool { manifest, runner }));
    }

    pub fn register_hook(&mut self, name: impl Into<String>, priority: i32, func: HookFn) {
        self.hooks.push((name.into(), RegisteredHook { priority, func }));
    }

    pub fn register_route(&mut self, method: impl Into<String>, path: impl Into<String>, handler: RouteHandler) {
        self.routes.push(RegisteredRoute {
            method: method.into(),
            path: format!("/api/plugins/{}{}", self.plugin_id, path_with_leading_slash(path.into())),
            handler,
        });
    }

    pub fn register_command(&mut self, name: impl Into<String>, handler: CommandHandler) {
        self.commands.push((name.into(), handler));
    }

    pub fn register_service(&mut self, service: ServiceHandle) {
        self.services.push(service);
    }

    pub fn config(&self) -> &HashMap<String, Value> {
        &self.config
    }

    pub fn log_scope(&self) -> tracing::Span {
        tracing::info_span!("plugin", id = %self.plugin_id)
    }
}

fn path_with_leading_slash(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}
