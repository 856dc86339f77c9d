//! Attestation chain signing and verification (spec.md §4.8): each hop in
//! a delegation chain signs the request with an HMAC over its canonical
//! bytes, keyed by the shared swarm token.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::types::{Attestation, AttestationChain, NodeId, SwarmTaskRequest};

type HmacSha256 = Hmac<Sha256>;

/// Bytes every hop signs: the task's immutable core. Deliberately excludes
/// `delegation_depth` and `parent_attestation_chain`, which change hop to
/// hop, so each prior signature keeps verifying as the chain grows.
fn signing_bytes(request: &SwarmTaskRequest) -> Vec<u8> {
    let core = serde_json::json!({
        "task_id": request.task_id,
        "originator_node_id": request.originator_node_id,
        "originator_session_id": request.originator_session_id,
        "task_text": request.task_text,
        "constraints": request.constraints,
        "correlation_id": request.correlation_id,
        "nonce": request.nonce,
        "task_attributes": request.task_attributes,
    });
    serde_json::to_vec(&core).expect("Value always serializes")
}

fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 over a value's canonical JSON encoding, for comparing findings
/// across consensus-verification peers (spec.md §4.8). `serde_json::Value`
/// objects are `BTreeMap`-backed here, so `to_vec` already sorts keys.
pub fn canonical_hash(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).expect("Value always serializes");
    digest_hex(&bytes)
}

fn sign(token: &str, bytes: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// Signs this node's hop and prepends it to the request's chain.
pub fn sign_hop(token: &str, node_id: NodeId, request: &mut SwarmTaskRequest) {
    let bytes = signing_bytes(request);
    request.parent_attestation_chain.hops.insert(
        0,
        Attestation {
            node_id,
            payload_hash: digest_hex(&bytes),
            hmac: sign(token, &bytes),
        },
    );
}

/// Verifies every hop in the chain against the same shared token and the
/// task's immutable signing bytes. A tampered chain — wrong HMAC, wrong
/// payload hash, or a hop appended out of order — fails.
pub fn verify_chain(token: &str, request: &SwarmTaskRequest) -> bool {
    let bytes = signing_bytes(request);
    let expected_hash = digest_hex(&bytes);
    let expected_hmac = sign(token, &bytes);
    request
        .parent_attestation_chain
        .hops
        .iter()
        .all(|hop| hop.payload_hash == expected_hash && hop.hmac == expected_hmac)
}
