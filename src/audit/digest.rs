//! Hashing and id helpers for the audit trail.
//!
//! - **Prefixed digests**: every digest is "sha256:<hex>" so the algorithm is
//!   explicit in stored records.
//! - **Deterministic ids**: the same document and decision always produce the
//!   same entry id, independent of run id or wall clock.

use sha2::{Digest, Sha256};

/// Compute SHA256 hash of a byte slice, returning hex string with prefix
///
/// # Returns
/// * String in format "sha256:abc123..."
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    format!("sha256:{}", hex::encode(result))
}

/// Hash of `text[start..end]`, or `None` when the range is not a valid slice
pub fn compute_slice_hash(text: &str, start: usize, end: usize) -> Option<String> {
    text.get(start..end).map(|slice| compute_hash(slice.as_bytes()))
}

/// Compute deterministic audit entry ID
///
/// ID = sha256(document_id + target_id + rule + start + end)[:16]
pub fn compute_entry_id(
    document_id: &str,
    target_id: &str,
    rule: &str,
    span: (usize, usize),
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(target_id.as_bytes());
    hasher.update(rule.as_bytes());
    hasher.update(span.0.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(span.1.to_string().as_bytes());

    let result = hasher.finalize();
    hex::encode(&result[..8]) // 16 hex chars = 8 bytes
}
