//! Append-only, hash-chained event journal (spec.md §4.1).
//!
//! One physical `journal.jsonl` file holds events for every session. The
//! hash chain and the `seq` counter are scoped per `session_id` (mirroring
//! the teacher's `DurableJournal`, which keeps one `AtomicU64` per agent):
//! each session's own subsequence of events is contiguous from 0 and
//! verifies independently, which is what lets `compact` drop unrelated
//! sessions without perturbing a retained session's chain.

pub mod canonical;
pub mod event;
pub mod redact;

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

pub use event::{JournalEvent, JournalEventKind};
pub use redact::RedactionRules;

use crate::types::{EventId, JournalError, SessionId};

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub path: PathBuf,
    /// fsync after every write. Spec default is on; tests disable it to
    /// avoid touching real disk semantics under tmpfs.
    pub fsync: bool,
    pub redact: bool,
    pub redaction_rules: RedactionRules,
}

impl JournalConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: true,
            redact: true,
            redaction_rules: RedactionRules::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SessionChainState {
    next_seq: u64,
    last_hash: Option<String>,
    terminal: bool,
}

struct WriterState {
    file: std::fs::File,
    sessions: HashMap<SessionId, SessionChainState>,
}

pub struct Journal {
    config: JournalConfig,
    writer: Arc<Mutex<WriterState>>,
}

impl Journal {
    /// Opens (creating if absent) the log file and recovers the per-session
    /// seq/hash state by scanning it. A truncated final line (no trailing
    /// newline — a crash mid-write) is discarded; the recovered state comes
    /// from the preceding complete line. Corrupted lines elsewhere in the
    /// file are logged and skipped, never aborting recovery.
    ///
    /// All file I/O runs on `spawn_blocking`'s worker pool rather than
    /// inline on the calling task: `std::fs::File` and the canonical-line
    /// writer are synchronous, and doing that work directly on an async
    /// executor thread would stall every other task scheduled on it.
    pub async fn init(config: JournalConfig) -> Result<Self, JournalError> {
        let path = config.path.clone();
        let writer = tokio::task::spawn_blocking(move || -> Result<WriterState, JournalError> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let raw = read_existing(&path)?;
            let sessions = recover_session_state(&raw);

            let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;

            Ok(WriterState { file, sessions })
        })
        .await
        .expect("journal init task panicked")?;

        Ok(Self {
            config,
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// Appends an event with the next per-session seq, links the hash
    /// chain, writes one canonical-JSON line, and returns the full event.
    pub async fn emit(
        &self,
        session_id: SessionId,
        kind: JournalEventKind,
        mut payload: serde_json::Value,
    ) -> Result<JournalEvent, JournalError> {
        if self.config.redact {
            self.config.redaction_rules.apply(&mut payload);
        }

        let writer = Arc::clone(&self.writer);
        let fsync = self.config.fsync;

        tokio::task::spawn_blocking(move || -> Result<JournalEvent, JournalError> {
            let mut state = writer.lock().expect("journal writer mutex poisoned");
            let chain = state.sessions.entry(session_id).or_default();
            if chain.terminal {
                return Err(JournalError::SessionTerminal(session_id.to_string()));
            }

            let mut event = JournalEvent {
                event_id: EventId::new(),
                seq: chain.next_seq,
                timestamp: chrono::Utc::now(),
                session_id,
                kind,
                payload,
                hash_prev: chain.last_hash.clone(),
                hash_self: None,
            };
            let hash = canonical::compute_hash(event.hash_prev.as_deref(), &event);
            event.hash_self = Some(hash.clone());

            let mut line = canonical::canonical_line(&event);
            line.push(b'\n');
            state.file.write_all(&line)?;
            if fsync {
                state.file.sync_data()?;
            }

            chain.next_seq += 1;
            chain.last_hash = Some(hash);
            chain.terminal = kind.is_terminal();

            Ok(event)
        })
        .await
        .expect("journal writer task panicked")
    }

    /// All events in the file, in append order, skipping unparsable lines.
    pub async fn read_all(&self) -> Result<Vec<JournalEvent>, JournalError> {
        let writer = Arc::clone(&self.writer);
        let path = self.config.path.clone();

        tokio::task::spawn_blocking(move || -> Result<Vec<JournalEvent>, JournalError> {
            // Hold the writer lock so we never read a half-written line.
            let _state = writer.lock().expect("journal writer mutex poisoned");
            let raw = read_existing(&path)?;
            Ok(parse_complete_lines(&raw))
        })
        .await
        .expect("journal reader task panicked")
    }

    /// Events for one session, in seq order.
    pub async fn read_session(&self, session_id: SessionId) -> Result<Vec<JournalEvent>, JournalError> {
        let mut events: Vec<JournalEvent> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect();
        events.sort_by_key(|e| e.seq);
        Ok(events)
    }

    /// Rewrites the log keeping only events whose session is in
    /// `retain_sessions`, preserving relative order. Writes to a sibling
    /// temp file and renames atomically; the in-process writer lock is
    /// held for the whole rewrite so concurrent emits serialize behind it.
    /// Returns `(count_before, count_after)`.
    pub async fn compact(&self, retain_sessions: &[SessionId]) -> Result<(usize, usize), JournalError> {
        let writer = Arc::clone(&self.writer);
        let path = self.config.path.clone();
        let retain_sessions = retain_sessions.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(usize, usize), JournalError> {
            let mut state = writer.lock().expect("journal writer mutex poisoned");

            let raw = read_existing(&path)?;
            let before = parse_complete_lines(&raw);
            let retain: std::collections::HashSet<SessionId> = retain_sessions.into_iter().collect();

            let kept: Vec<JournalEvent> = before
                .iter()
                .filter(|e| retain.contains(&e.session_id))
                .cloned()
                .collect();

            let mut new_sessions: HashMap<SessionId, SessionChainState> = HashMap::new();
            let mut rewritten = Vec::with_capacity(kept.len());
            for mut event in kept {
                let chain = new_sessions.entry(event.session_id).or_default();
                let hash_prev = chain.last_hash.clone();
                event.hash_prev = hash_prev.clone();
                event.hash_self = None;
                let hash = canonical::compute_hash(hash_prev.as_deref(), &event);
                event.hash_self = Some(hash.clone());
                chain.last_hash = Some(hash);
                chain.next_seq = event.seq + 1;
                chain.terminal = event.kind.is_terminal();
                rewritten.push(event);
            }

            let temp_path = sibling_temp_path(&path);
            {
                let mut temp_file = std::fs::OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&temp_path)?;
                for event in &rewritten {
                    let mut line = canonical::canonical_line(event);
                    line.push(b'\n');
                    temp_file.write_all(&line)?;
                }
                temp_file.sync_all()?;
            }
            std::fs::rename(&temp_path, &path).map_err(|e| JournalError::CompactionFailed(e.to_string()))?;

            let file = std::fs::OpenOptions::new().create(true).append(true).open(&path)?;
            state.file = file;
            state.sessions = new_sessions;

            Ok((before.len(), rewritten.len()))
        })
        .await
        .expect("journal compaction task panicked")
    }
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".compact.tmp");
    path.with_file_name(name)
}

fn read_existing(path: &Path) -> std::io::Result<String> {
    match std::fs::File::open(path) {
        Ok(mut f) => {
            let mut buf = String::new();
            f.read_to_string(&mut buf)?;
            Ok(buf)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e),
    }
}

/// Splits into lines, dropping a trailing line with no newline terminator
/// (a truncated write from a crash mid-append).
fn complete_lines(raw: &str) -> Vec<&str> {
    if raw.is_empty() {
        return Vec::new();
    }
    let ends_with_newline = raw.ends_with('\n');
    let mut lines: Vec<&str> = raw.lines().collect();
    if !ends_with_newline {
        lines.pop();
    }
    lines
}

fn parse_complete_lines(raw: &str) -> Vec<JournalEvent> {
    complete_lines(raw)
        .into_iter()
        .filter_map(|line| match serde_json::from_str::<JournalEvent>(line) {
            Ok(event) => Some(event),
            Err(err) => {
                warn!(error = %err, "skipping corrupted journal line during recovery");
                None
            }
        })
        .collect()
}

fn recover_session_state(raw: &str) -> HashMap<SessionId, SessionChainState> {
    let mut sessions: HashMap<SessionId, SessionChainState> = HashMap::new();
    for event in parse_complete_lines(raw) {
        let chain = sessions.entry(event.session_id).or_default();
        if event.seq >= chain.next_seq {
            chain.next_seq = event.seq + 1;
            chain.last_hash = event.hash_self.clone();
        }
        if event.kind.is_terminal() {
            chain.terminal = true;
        }
    }
    sessions
}
