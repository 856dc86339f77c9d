//! Explicit runtime configuration (SPEC_FULL.md ambient-stack section).
//!
//! No global singleton: every component that needs configuration takes it
//! through this struct (or a field of it) at construction time. Loading it
//! from environment variables or a config file is the embedder's job
//! (spec.md §1 lists the configuration loader as out of scope) — this
//! struct is the typed destination such a loader would populate.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::journal::{JournalConfig, RedactionRules};
use crate::kernel::futility::FutilityConfig;
use crate::kernel::context_budget::ContextBudgetConfig;
use crate::plugin_host::circuit_breaker::CircuitBreakerConfig;
use crate::swarm::PeerTableConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalSettings {
    pub path: PathBuf,
    pub fsync: bool,
    pub redact: bool,
    #[serde(default)]
    pub redaction_rules: RedactionRules,
}

impl Default for JournalSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("journal.jsonl"),
            fsync: true,
            redact: true,
            redaction_rules: RedactionRules::default(),
        }
    }
}

impl From<JournalSettings> for JournalConfig {
    fn from(s: JournalSettings) -> Self {
        JournalConfig {
            path: s.path,
            fsync: s.fsync,
            redact: s.redact,
            redaction_rules: s.redaction_rules,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSettings {
    pub max_concurrent_sessions: usize,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub journal: JournalSettings,
    pub kernel: KernelSettings,
    pub futility: FutilityConfig,
    pub context_budget: ContextBudgetConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub peer_table: PeerTableConfig,
    pub swarm_token: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            journal: JournalSettings::default(),
            kernel: KernelSettings::default(),
            futility: FutilityConfig::default(),
            context_budget: ContextBudgetConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            peer_table: PeerTableConfig::default(),
            swarm_token: String::new(),
        }
    }
}
