//! Chain planning: diff on-disk entries against a schema's applied history.
//!
//! Planning is pure; callers fetch the persisted version list for each schema
//! and receive the migrations still to run. The persisted list must be a
//! strict prefix of the entry list (same order, same names) or planning fails
//! with a timeline violation, which protects against history edits and
//! out-of-order file additions.

use crate::error::{CoreError, CoreResult};
use crate::registry::{MigrationEntry, MigrationFile};
use std::sync::Arc;

/// Direction of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    Up,
    Dn,
}

/// One script execution planned for a single schema.
#[derive(Debug, Clone)]
pub struct Migration {
    /// Canonical version name, or `before`/`after` for hook scripts.
    pub version: String,

    /// The script to run.
    pub file: Arc<MigrationFile>,

    /// The exact version list to persist in the same transaction as the
    /// script; `None` leaves the list untouched (hook scripts).
    pub new_versions: Option<Vec<String>>,
}

/// Plan the forward chain for one schema.
///
/// Walks `entries` and `applied` in lockstep and returns the entry suffix
/// still to apply, each migration carrying the cumulative version list to
/// persist after it commits.
pub fn plan_up(
    schema: &str,
    entries: &[Arc<MigrationEntry>],
    applied: &[String],
) -> CoreResult<Vec<Migration>> {
    for (i, name) in applied.iter().enumerate() {
        match entries.get(i) {
            Some(e) if e.name == *name => {}
            Some(e) => {
                return Err(CoreError::TimelineViolation {
                    schema: schema.to_string(),
                    proposed: e.name.clone(),
                    applied: name.clone(),
                })
            }
            None => {
                return Err(CoreError::MissingOnDisk {
                    schema: schema.to_string(),
                    version: name.clone(),
                })
            }
        }
    }

    let mut versions: Vec<String> = applied.to_vec();
    let mut chain = Vec::with_capacity(entries.len() - applied.len());
    for entry in &entries[applied.len()..] {
        versions.push(entry.name.clone());
        chain.push(Migration {
            version: entry.name.clone(),
            file: Arc::clone(&entry.up),
            new_versions: Some(versions.clone()),
        });
    }
    Ok(chain)
}

/// Plan the undo of `undo_version` for one schema.
///
/// Only the latest applied version may be undone. Returns `None` when the
/// target was never applied on this schema (the schema is simply skipped).
pub fn plan_undo(
    schema: &str,
    entries: &[Arc<MigrationEntry>],
    applied: &[String],
    undo_version: &str,
) -> CoreResult<Option<Migration>> {
    let Some(last) = applied.last() else {
        return Ok(None);
    };

    if last == undo_version {
        let entry = entries
            .iter()
            .find(|e| e.name == undo_version)
            .ok_or_else(|| CoreError::MissingOnDisk {
                schema: schema.to_string(),
                version: undo_version.to_string(),
            })?;
        return Ok(Some(Migration {
            version: entry.name.clone(),
            file: Arc::clone(&entry.dn),
            new_versions: Some(applied[..applied.len() - 1].to_vec()),
        }));
    }

    if applied[..applied.len() - 1].iter().any(|v| v == undo_version) {
        return Err(CoreError::UndoNotLatest {
            schema: schema.to_string(),
            version: undo_version.to_string(),
            latest: last.clone(),
        });
    }

    Ok(None)
}

#[cfg(test)]
#[path = "patch_test.rs"]
mod tests;
