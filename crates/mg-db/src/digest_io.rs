//! Fleet-level bookkeeping: digests and rerun fingerprints.
//!
//! Both values live in constant functions in each host's default schema.
//! Writes are best-effort fan-outs: a host that misses a digest write is
//! healed at read time by best-digest reconciliation, and a host that misses
//! a fingerprint write simply forces a hook replay. Reads are strict only
//! where the protocol demands it (a complete digest blackout is fatal).

use crate::dest::{quote_ident, quote_literal, Dest};
use crate::error::{DbError, DbResult};
use crate::traits::SqlRunner;
use futures::future::join_all;
use mg_core::fingerprint::build_rerun_fingerprint;
use std::sync::Arc;

const DIGEST_FN: &str = "mig_digest_const";
const FINGERPRINT_FN: &str = "mig_rerun_fingerprint_const";

/// What to store as the rerun fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintWrite {
    /// Clear the fingerprint: the next run must execute before/after.
    Reset,
    /// Store the freshly built fingerprint: hooks may be skipped while it
    /// still matches.
    UpToDate,
}

/// Read a constant function's value, or `None` when the function is absent.
async fn read_const_fn(
    runner: &Arc<dyn SqlRunner>,
    dest: &Dest,
    name: &str,
) -> DbResult<Option<String>> {
    let probe = format!(
        "SELECT 1 FROM pg_catalog.pg_proc p \
         JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
         WHERE p.proname = {} AND n.nspname = {}",
        quote_literal(name),
        quote_literal(&dest.schema)
    );
    if runner.run_query(dest, &probe).await?.is_empty() {
        return Ok(None);
    }
    let rows = runner
        .run_query(
            dest,
            &format!("SELECT {}.{}()", quote_ident(&dest.schema), name),
        )
        .await?;
    Ok(rows.into_iter().next().and_then(|row| row.into_iter().next()))
}

/// Replace a constant function so it returns `value`.
async fn write_const_fn(
    runner: &Arc<dyn SqlRunner>,
    dest: &Dest,
    name: &str,
    value: &str,
) -> DbResult<()> {
    let sql = format!(
        "CREATE OR REPLACE FUNCTION {}.{}() RETURNS text LANGUAGE sql AS $mig$SELECT {}::text$mig$",
        quote_ident(&dest.schema),
        name,
        quote_literal(value)
    );
    runner.run_query(dest, &sql).await?;
    Ok(())
}

/// Read every host's digest; absent functions read as missing, unreachable
/// hosts are logged. Fails only when no host answered at all.
pub async fn load_digests(runner: &Arc<dyn SqlRunner>, dests: &[Dest]) -> DbResult<Vec<String>> {
    let reads = join_all(
        dests
            .iter()
            .map(|dest| read_const_fn(runner, dest, DIGEST_FN)),
    )
    .await;

    let mut digests = Vec::new();
    let mut any_answered = false;
    for (dest, read) in dests.iter().zip(reads) {
        match read {
            Ok(Some(value)) => {
                any_answered = true;
                digests.push(value);
            }
            Ok(None) => any_answered = true,
            Err(e) => log::warn!("Could not read digest from {dest}: {e}"),
        }
    }
    if any_answered {
        Ok(digests)
    } else {
        Err(DbError::DigestBlackout)
    }
}

/// Write a digest (or reset label) to every host, tolerating partial
/// failure.
pub async fn save_digests(runner: &Arc<dyn SqlRunner>, dests: &[Dest], value: &str) {
    let writes = join_all(
        dests
            .iter()
            .map(|dest| write_const_fn(runner, dest, DIGEST_FN, value)),
    )
    .await;
    for (dest, write) in dests.iter().zip(writes) {
        if let Err(e) = write {
            log::warn!("Could not save digest on {dest}: {e}");
        }
    }
}

/// Build the current fingerprint for one host.
async fn current_fingerprint(
    runner: &Arc<dyn SqlRunner>,
    dest: &Dest,
    dep_bodies: &[&str],
) -> DbResult<String> {
    let schemas = dest.load_schemas(runner).await?;
    Ok(build_rerun_fingerprint(&schemas, dep_bodies))
}

/// Store the rerun fingerprint (or clear it) on every host.
///
/// Clearing must not fail silently: a host that still carries an up-to-date
/// fingerprint after a crash would skip its hook replay, so write errors on
/// `Reset` are returned to the caller.
pub async fn save_rerun_fingerprints(
    runner: &Arc<dyn SqlRunner>,
    dests: &[Dest],
    dep_bodies: &[&str],
    mode: FingerprintWrite,
) -> DbResult<()> {
    for dest in dests {
        let value = match mode {
            FingerprintWrite::Reset => String::new(),
            FingerprintWrite::UpToDate => current_fingerprint(runner, dest, dep_bodies).await?,
        };
        match mode {
            FingerprintWrite::Reset => {
                write_const_fn(runner, dest, FINGERPRINT_FN, &value).await?;
            }
            FingerprintWrite::UpToDate => {
                if let Err(e) = write_const_fn(runner, dest, FINGERPRINT_FN, &value).await {
                    log::warn!("Could not save rerun fingerprint on {dest}: {e}");
                }
            }
        }
    }
    Ok(())
}

/// True iff every host holds a non-empty fingerprint equal to the current
/// build. Any read failure counts as a mismatch.
pub async fn check_rerun_fingerprints(
    runner: &Arc<dyn SqlRunner>,
    dests: &[Dest],
    dep_bodies: &[&str],
) -> bool {
    for dest in dests {
        let stored = match read_const_fn(runner, dest, FINGERPRINT_FN).await {
            Ok(Some(value)) if !value.is_empty() => value,
            Ok(_) => return false,
            Err(e) => {
                log::warn!("Could not read rerun fingerprint from {dest}: {e}");
                return false;
            }
        };
        match current_fingerprint(runner, dest, dep_bodies).await {
            Ok(current) if current == stored => {}
            Ok(_) => return false,
            Err(e) => {
                log::warn!("Could not build rerun fingerprint for {dest}: {e}");
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
#[path = "digest_io_test.rs"]
mod tests;
