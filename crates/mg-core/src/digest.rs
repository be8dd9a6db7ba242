//! Digest strings and the best-digest policy.
//!
//! A digest is `"<order>.<hash>"` where `<order>` is the numeric timestamp
//! prefix of the newest on-disk version. Deployers compare digests
//! lexicographically to decide whether a database is at or beyond a given
//! code version. A partial undo is recorded as a reset digest (`"0.<label>"`)
//! which compares below any real digest, so a half-undone fleet never looks
//! deployable.

/// Reset label written before a chain of down migrations starts.
pub const RESET_BEFORE_UNDO: &str = "before-undo";

/// Reset label written after a chain of down migrations finished.
pub const RESET_AFTER_UNDO: &str = "after-undo";

/// Render a reset label as a digest string.
pub fn reset_digest(label: &str) -> String {
    format!("0.{label}")
}

fn reset_label(s: &str) -> Option<&str> {
    let bare = s.strip_prefix("0.").unwrap_or(s);
    (bare == RESET_BEFORE_UNDO || bare == RESET_AFTER_UNDO).then_some(bare)
}

fn is_real(s: &str) -> bool {
    if reset_label(s).is_some() {
        return false;
    }
    match s.split_once('.') {
        Some((order, hash)) => {
            !order.is_empty() && order.bytes().all(|b| b.is_ascii_digit()) && !hash.is_empty()
        }
        None => false,
    }
}

/// Reduce digests read from multiple hosts to the authoritative one.
///
/// Digest writes are best-effort across the fleet, so readers must reconcile:
/// any real digest proves the fleet reached at least that code version and
/// the greatest one wins; with only reset labels in sight the fleet is in a
/// partial-undo state and reports below any code digest. Unrecognized values
/// are ignored.
pub fn choose_best_digest<'a, I>(digests: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best_real: Option<&str> = None;
    let mut best_reset: Option<&str> = None;
    for d in digests {
        if let Some(label) = reset_label(d) {
            best_reset = Some(match best_reset {
                Some(cur) if cur <= label => cur,
                _ => label,
            });
        } else if is_real(d) {
            best_real = Some(match best_real {
                Some(cur) if cur >= d => cur,
                _ => d,
            });
        }
    }
    if let Some(real) = best_real {
        real.to_string()
    } else if let Some(label) = best_reset {
        reset_digest(label)
    } else {
        "0".to_string()
    }
}

#[cfg(test)]
#[path = "digest_test.rs"]
mod tests;
