//! Canonical encoding and hash-chain computation for journal events.
//!
//! `serde_json::Value`'s object type is a `BTreeMap` unless the
//! `preserve_order` feature is enabled (it isn't here), so plain
//! `serde_json::to_vec` already sorts object keys lexicographically and
//! uses the shortest round-trip float representation. Canonicalization is
//! therefore just "serialize the event with `hash_self` stripped".

use sha2::{Digest, Sha256};

use super::event::JournalEvent;

/// Bytes to hash: the event's canonical JSON with `hash_self` removed
/// (it can't include itself), `hash_prev` intact.
pub fn canonical_bytes_without_hash_self(event: &JournalEvent) -> Vec<u8> {
    let mut value = serde_json::to_value(event).expect("JournalEvent always serializes");
    if let Some(obj) = value.as_object_mut() {
        obj.remove("hash_self");
    }
    serde_json::to_vec(&value).expect("Value always serializes")
}

/// `hash_self = SHA256(hash_prev_bytes ++ canonical(event minus hash_self))`.
pub fn compute_hash(hash_prev: Option<&str>, event: &JournalEvent) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = hash_prev {
        hasher.update(prev.as_bytes());
    }
    hasher.update(canonical_bytes_without_hash_self(event));
    hex::encode(hasher.finalize())
}

/// The canonical encoding of a full event (with both hash fields set),
/// i.e. what actually gets written as one journal line.
pub fn canonical_line(event: &JournalEvent) -> Vec<u8> {
    serde_json::to_vec(event).expect("JournalEvent always serializes")
}
