//! Core runtime for an autonomous agent system: a kernel executes plans
//! under permission and resource limits, journals every decision, hosts
//! sandboxed plugins, and federates with peer runtimes over a swarm mesh.

pub mod api;
pub mod config;
pub mod journal;
pub mod kernel;
pub mod permission;
pub mod plugin_host;
pub mod schema;
pub mod swarm;
pub mod tool_runtime;
pub mod types;

pub use config::RuntimeConfig;
