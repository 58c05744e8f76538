//! Verifiable audit trail for redactions.
//!
//! Every masked range is recorded with its original substring, a SHA-256
//! digest of it and the placeholder it was replaced with. Given the original
//! text, the trail is enough to re-derive the redacted text exactly.

pub mod digest;
pub mod types;

pub use digest::{compute_entry_id, compute_hash, compute_slice_hash};
pub use types::{AuditEntry, Replacement};

use crate::error::InvariantViolation;

/// Check that `trail` turns `original` into `redacted`.
///
/// Verifies each replacement's recorded substring and digest against the
/// original, then replays the applied replacements right to left.
pub fn verify_trail(
    original: &str,
    redacted: &str,
    trail: &[AuditEntry],
) -> Result<(), InvariantViolation> {
    let mut applied: Vec<&Replacement> = Vec::new();

    for entry in trail {
        for replacement in &entry.replacements {
            let slice = original
                .get(replacement.start..replacement.end)
                .ok_or(InvariantViolation::OffsetOutOfBounds {
                    start: replacement.start,
                    end: replacement.end,
                    len: original.len(),
                })?;

            if slice != replacement.original {
                return Err(InvariantViolation::AuditMismatch(format!(
                    "entry {} records a different substring at {}..{}",
                    entry.entry_id, replacement.start, replacement.end
                )));
            }
            if compute_hash(slice.as_bytes()) != replacement.original_sha256 {
                return Err(InvariantViolation::AuditMismatch(format!(
                    "entry {} digest mismatch at {}..{}",
                    entry.entry_id, replacement.start, replacement.end
                )));
            }
            if replacement.is_applied() {
                applied.push(replacement);
            }
        }
    }

    applied.sort_by(|a, b| b.start.cmp(&a.start));
    let mut rebuilt = original.to_string();
    let mut floor = usize::MAX;
    for replacement in applied {
        if replacement.end > floor {
            return Err(InvariantViolation::AuditMismatch(format!(
                "applied replacements overlap at {}..{}",
                replacement.start, replacement.end
            )));
        }
        rebuilt.replace_range(replacement.start..replacement.end, &replacement.placeholder);
        floor = replacement.start;
    }

    if rebuilt != redacted {
        return Err(InvariantViolation::AuditMismatch(
            "replaying the trail does not reproduce the redacted text".to_string(),
        ));
    }
    Ok(())
}
