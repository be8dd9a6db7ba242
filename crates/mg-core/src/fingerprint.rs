//! Rerun fingerprints for the before/after hook scripts.
//!
//! An empty fingerprint on any host means the next run must execute
//! `before.sql` and `after.sql` even if no versions are pending. The
//! fingerprint is cleared at the start of every mutating run and restored on
//! full success, so a crash anywhere in between forces a hook replay.

use crate::checksum::compute_checksum;

/// Build the fingerprint for one host: its schema set plus a content hash of
/// every hook script. Either changing forces a hook rerun.
pub fn build_rerun_fingerprint(schemas: &[String], dep_bodies: &[&str]) -> String {
    let mut parts: Vec<String> = schemas.to_vec();
    parts.sort();
    for body in dep_bodies {
        parts.push(format!("hash={}", compute_checksum(body)));
    }
    parts.join(",")
}

#[cfg(test)]
#[path = "fingerprint_test.rs"]
mod tests;
