//! Plugin Host: discovers, loads, and supervises sandboxed plugins
//! (spec.md §4.7).
//!
//! A plugin is a shared library (`.so`/`.dylib`/`.dll`) whose manifest
//! `entry` field names it. Loading `dlopen`s the library and calls its
//! `register` symbol with a [`PluginApi`] the plugin populates with tools,
//! hooks, routes, commands, and services. The plugin must be built against
//! the same compiler version as the host, the usual caveat of in-process
//! Rust plugin loading via `libloading`.

pub mod api;
pub mod circuit_breaker;
pub mod dispatch;
pub mod discovery;

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::journal::{Journal, JournalEventKind};
use crate::tool_runtime::ToolRunner;
use crate::types::{PluginError, PluginManifest, SessionId, ToolManifest};

pub use api::{CommandHandler, HookFn, HookVerdict, PluginApi, RouteHandler, ServiceHandle};
pub use circuit_breaker::CircuitBreakerConfig;
pub use dispatch::{HookDispatcher, HookFinalAction, HookOutcome};

type RegisterSymbol = unsafe extern "C" fn(*mut PluginApi) -> bool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Discovered,
    Loading,
    Active,
    Failed { reason: String },
}

pub struct PluginRecord {
    pub manifest: PluginManifest,
    pub dir: PathBuf,
    pub content_hash: String,
    pub status: PluginStatus,
    registered_tools: Vec<String>,
    registered_hooks: Vec<String>,
    registered_routes: Vec<(String, String)>,
    registered_commands: Vec<String>,
    registered_services: Vec<String>,
}

/// A read-only snapshot of one plugin's bookkeeping, for the HTTP control
/// plane (spec.md §6: `GET /api/plugins`, `GET /api/plugins/:id`).
#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub plugin_id: String,
    pub manifest: PluginManifest,
    pub status: PluginStatus,
    pub content_hash: String,
    pub registered_routes: Vec<(String, String)>,
}

pub struct PluginHost {
    records: DashMap<String, PluginRecord>,
    libraries: DashMap<String, libloading::Library>,
    tools: DashMap<String, (ToolManifest, Arc<dyn ToolRunner>)>,
    routes: DashMap<(String, String), RouteHandler>,
    commands: DashMap<String, CommandHandler>,
    services: DashMap<String, ServiceHandle>,
    dispatcher: HookDispatcher,
    journal: Option<Arc<Journal>>,
}

impl PluginHost {
    pub fn new(circuit_config: CircuitBreakerConfig, journal: Option<Arc<Journal>>) -> Self {
        Self {
            records: DashMap::new(),
            libraries: DashMap::new(),
            tools: DashMap::new(),
            routes: DashMap::new(),
            commands: DashMap::new(),
            services: DashMap::new(),
            dispatcher: HookDispatcher::new(circuit_config, journal.clone()),
            journal,
        }
    }

    pub fn dispatcher(&self) -> &HookDispatcher {
        &self.dispatcher
    }

    pub fn status(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.records.get(plugin_id).map(|r| r.status.clone())
    }

    pub fn descriptor(&self, plugin_id: &str) -> Option<PluginDescriptor> {
        self.records.get(plugin_id).map(|r| PluginDescriptor {
            plugin_id: plugin_id.to_string(),
            manifest: r.manifest.clone(),
            status: r.status.clone(),
            content_hash: r.content_hash.clone(),
            registered_routes: r.registered_routes.clone(),
        })
    }

    pub fn list(&self) -> Vec<PluginDescriptor> {
        self.records
            .iter()
            .map(|entry| PluginDescriptor {
                plugin_id: entry.key().clone(),
                manifest: entry.value().manifest.clone(),
                status: entry.value().status.clone(),
                content_hash: entry.value().content_hash.clone(),
                registered_routes: entry.value().registered_routes.clone(),
            })
            .collect()
    }

    pub fn tool(&self, name: &str) -> Option<(ToolManifest, Arc<dyn ToolRunner>)> {
        self.tools.get(name).map(|v| v.clone())
    }

    /// Looks up a plugin-registered route for the `/api/plugins/:id/...`
    /// passthrough row (spec.md §6) — the embedder's router consults this
    /// directly rather than going through `RuntimeApiProvider`.
    pub fn route(&self, method: &str, path: &str) -> Option<RouteHandler> {
        self.routes.get(&(method.to_string(), path.to_string())).map(|v| v.clone())
    }

    /// Discovers plugins under `dir` and records each as `Discovered`
    /// without loading it (spec.md §4.7's `discover(dir)`).
    pub async fn discover_dir(&self, session_id: SessionId, dir: &Path) -> Vec<String> {
        let found = discovery::discover(dir);
        let mut ids = Vec::with_capacity(found.len());
        for plugin in found {
            let id = plugin.manifest.id.clone();
            self.records.insert(
                id.clone(),
                PluginRecord {
                    manifest: plugin.manifest,
                    dir: plugin.dir,
                    content_hash: plugin.content_hash,
                    status: PluginStatus::Discovered,
                    registered_tools: Vec::new(),
                    registered_hooks: Vec::new(),
                    registered_routes: Vec::new(),
                    registered_commands: Vec::new(),
                    registered_services: Vec::new(),
                },
            );
            self.emit(session_id, JournalEventKind::PluginDiscovered, &id).await;
            ids.push(id);
        }
        ids
    }

    /// Loads (or reloads onto fresh state) the plugin at `dir` (spec.md
    /// §4.7's `loadPlugin(dir)`, steps 1-5).
    pub async fn load_plugin(&self, session_id: SessionId, dir: &Path) -> Result<String, PluginError> {
        let manifest_path = dir.join("plugin.yaml");
        let manifest_text = std::fs::read_to_string(&manifest_path)?;
        let manifest: PluginManifest = serde_yaml::from_str(&manifest_text)
            .map_err(|e| PluginError::LoadFailed(dir.display().to_string(), e.to_string()))?;
        manifest.validate()?;
        let id = manifest.id.clone();

        self.emit(session_id, JournalEventKind::PluginDiscovered, &id).await;
        self.emit(session_id, JournalEventKind::PluginLoading, &id).await;

        let entry_path = dir.join(&manifest.entry);
        let content_hash = std::fs::read(&entry_path)
            .map(|entry_bytes| discovery::content_hash(&manifest_text, &entry_bytes))
            .unwrap_or_default();
        let load_result = self.load_native(&id, &entry_path);

        match load_result {
            Ok((api, library)) => {
                self.libraries.insert(id.clone(), library);
                let registered_tools: Vec<String> = api.tools.iter().map(|(n, _)| n.clone()).collect();
                let registered_hooks: Vec<String> = api.hooks.iter().map(|(n, _)| n.clone()).collect();
                let registered_routes: Vec<(String, String)> = api
                    .routes
                    .iter()
                    .map(|r| (r.method.clone(), r.path.clone()))
                    .collect();
                let registered_commands: Vec<String> = api.commands.iter().map(|(n, _)| n.clone()).collect();
                let registered_services: Vec<String> = api.services.iter().map(|s| s.name.clone()).collect();

                for (name, tool) in api.tools {
                    self.tools.insert(name, (tool.manifest, tool.runner));
                }
                for (hook_name, hook) in api.hooks {
                    self.dispatcher.register(&hook_name, &id, hook.priority, hook.func);
                }
                for route in api.routes {
                    self.routes.insert((route.method, route.path), route.handler);
                }
                for (name, handler) in api.commands {
                    self.commands.insert(format!("{id}::{name}"), handler);
                }
                for service in &api.services {
                    self.services.insert(format!("{id}::{}", service.name), service.clone());
                }

                self.records.insert(
                    id.clone(),
                    PluginRecord {
                        manifest,
                        dir: dir.to_path_buf(),
                        content_hash,
                        status: PluginStatus::Active,
                        registered_tools,
                        registered_hooks,
                        registered_routes,
                        registered_commands,
                        registered_services,
                    },
                );
                self.emit(session_id, JournalEventKind::PluginLoaded, &id).await;

                self.start_services(session_id, &id, &api.services).await;
                Ok(id)
            }
            Err(reason) => {
                self.records.insert(
                    id.clone(),
                    PluginRecord {
                        manifest,
                        dir: dir.to_path_buf(),
                        content_hash,
                        status: PluginStatus::Failed { reason: reason.clone() },
                        registered_tools: Vec::new(),
                        registered_hooks: Vec::new(),
                        registered_routes: Vec::new(),
                        registered_commands: Vec::new(),
                        registered_services: Vec::new(),
                    },
                );
                self.emit_failed(session_id, &id, &reason).await;
                Err(PluginError::LoadFailed(id, reason))
            }
        }
    }

    fn load_native(&self, plugin_id: &str, entry_path: &Path) -> Result<(PluginApi, libloading::Library), String> {
        let library = unsafe { libloading::Library::new(entry_path) }
            .map_err(|e| format!("could not open entry library: {e}"))?;

        let symbol: libloading::Symbol<RegisterSymbol> = unsafe {
            library
                .get(b"register\0")
                .map_err(|e| format!("no callable 'register' symbol: {e}"))?
        };

        let mut api = PluginApi::new(plugin_id, HashMap::new());
        let ok = panic::catch_unwind(AssertUnwindSafe(|| unsafe { symbol(&mut api as *mut PluginApi) }))
            .map_err(|_| "register panicked".to_string())?;

        if !ok {
            return Err("register returned failure".to_string());
        }
        drop(symbol);
        Ok((api, library))
    }

    async fn start_services(&self, session_id: SessionId, plugin_id: &str, services: &[ServiceHandle]) {
        for service in services {
            let result = panic::catch_unwind(AssertUnwindSafe(|| (service.start)()));
            match result {
                Ok(Ok(())) => {
                    self.emit(session_id, JournalEventKind::PluginServiceStarted, plugin_id).await;
                }
                Ok(Err(err)) => {
                    tracing::warn!(plugin = plugin_id, service = %service.name, error = %err, "plugin service failed to start");
                    self.emit(session_id, JournalEventKind::PluginServiceFailed, plugin_id).await;
                }
                Err(_) => {
                    tracing::warn!(plugin = plugin_id, service = %service.name, "plugin service start panicked");
                    self.emit(session_id, JournalEventKind::PluginServiceFailed, plugin_id).await;
                }
            }
        }
    }

    /// Stops services (errors ignored), removes all registrations, emits
    /// `plugin.unloaded` (spec.md §4.7's Unload).
    pub async fn unload(&self, session_id: SessionId, plugin_id: &str) -> Result<(), PluginError> {
        let record = self
            .records
            .get(plugin_id)
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;

        for service_name in &record.registered_services {
            let key = format!("{plugin_id}::{service_name}");
            if let Some((_, service)) = self.services.remove(&key) {
                let _ = panic::catch_unwind(AssertUnwindSafe(|| (service.stop)()));
                self.emit(session_id, JournalEventKind::PluginServiceStopped, plugin_id).await;
            }
        }
        for tool_name in &record.registered_tools {
            self.tools.remove(tool_name);
        }
        for route in &record.registered_routes {
            self.routes.remove(route);
        }
        for command_name in &record.registered_commands {
            self.commands.remove(&format!("{plugin_id}::{command_name}"));
        }
        self.dispatcher.remove_plugin(plugin_id);
        drop(record);

        self.libraries.remove(plugin_id);
        if let Some(mut record) = self.records.get_mut(plugin_id) {
            record.status = PluginStatus::Discovered;
            record.registered_tools.clear();
            record.registered_hooks.clear();
            record.registered_routes.clear();
            record.registered_commands.clear();
            record.registered_services.clear();
        }
        self.emit(session_id, JournalEventKind::PluginUnloaded, plugin_id).await;
        Ok(())
    }

    /// Unload + loadPlugin; emits `plugin.reloaded` on success.
    pub async fn reload(&self, session_id: SessionId, plugin_id: &str) -> Result<(), PluginError> {
        let dir = self
            .records
            .get(plugin_id)
            .map(|r| r.dir.clone())
            .ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        self.unload(session_id, plugin_id).await?;
        self.load_plugin(session_id, &dir).await?;
        self.emit(session_id, JournalEventKind::PluginReloaded, plugin_id).await;
        Ok(())
    }

    pub async fn dispatch_hook(&self, hook_name: &str, session_id: SessionId, context: Value) -> HookOutcome {
        self.dispatcher.dispatch(hook_name, session_id, context).await
    }

    async fn emit(&self, session_id: SessionId, kind: JournalEventKind, plugin_id: &str) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.emit(session_id, kind, serde_json::json!({"plugin_id": plugin_id})).await {
                tracing::warn!(error = %err, "plugin host journal emission failed");
            }
        }
    }

    async fn emit_failed(&self, session_id: SessionId, plugin_id: &str, reason: &str) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal
                .emit(
                    session_id,
                    JournalEventKind::PluginFailed,
                    serde_json::json!({"plugin_id": plugin_id, "reason": reason}),
                )
                .await
            {
                tracing::warn!(error = %err, "plugin host journal emission failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SessionId {
        SessionId::new()
    }

    fn write_plugin(dir: &Path, id: &str) {
        let plugin_dir = dir.join(id);
        std::fs::create_dir(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.yaml"),
            format!("id: {id}\nname: {id}\nversion: 1.0.0\ndescription: test\nentry: main.so\n"),
        )
        .unwrap();
        std::fs::write(plugin_dir.join("main.so"), "not a real shared library").unwrap();
    }

    #[tokio::test]
    async fn discover_dir_records_plugins_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "sample");
        let host = PluginHost::new(CircuitBreakerConfig::default(), None);
        let ids = host.discover_dir(sid(), dir.path()).await;
        assert_eq!(ids, vec!["sample".to_string()]);
        assert_eq!(host.status("sample"), Some(PluginStatus::Discovered));
    }

    #[tokio::test]
    async fn load_plugin_with_unopenable_library_marks_failed() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "broken");
        let host = PluginHost::new(CircuitBreakerConfig::default(), None);
        let result = host.load_plugin(sid(), &dir.path().join("broken")).await;
        assert!(result.is_err());
        assert!(matches!(host.status("broken"), Some(PluginStatus::Failed { .. })));
    }

    #[tokio::test]
    async fn unload_unknown_plugin_errors() {
        let host = PluginHost::new(CircuitBreakerConfig::default(), None);
        let result = host.unload(sid(), "does-not-exist").await;
        assert!(matches!(result, Err(PluginError::NotFound(_))));
    }
}
