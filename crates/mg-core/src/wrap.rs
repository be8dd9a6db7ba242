//! Non-transactional index handling.
//!
//! `CREATE INDEX CONCURRENTLY` and `DROP INDEX CONCURRENTLY` refuse to run
//! inside a transaction, yet every migration script executes inside the
//! engine's bookkeeping transaction. This module classifies each file at load
//! time: a file that is nothing but concurrent index statements gets wrapped
//! in a `COMMIT; ... BEGIN;` sandwich by the executor, while a mixed file must
//! carry the sandwich itself. Violations are reported as a message list so
//! the author sees every problem at once.

use crate::vars::MigrationVars;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// How the executor must treat a migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexWrap {
    /// Plain SQL; runs inside the engine's transaction as-is.
    Transactional,

    /// The file is exactly one or more `CREATE INDEX CONCURRENTLY`
    /// statements. The executor closes the outer transaction, drops each
    /// index idempotently, includes the file, and reopens the transaction.
    CreateAlone { indexes: Vec<String> },

    /// The file is exactly `DROP INDEX CONCURRENTLY IF EXISTS` statements.
    DropAlone,

    /// The file mixes concurrent index work with other SQL and manages its
    /// own `COMMIT; ... BEGIN;` sandwich.
    Sandwich,
}

const IDENT: &str = r#""(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*"#;

fn create_conc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)^CREATE\s+(?:UNIQUE\s+)?INDEX\s+CONCURRENTLY\s+(?:IF\s+NOT\s+EXISTS\s+)?({IDENT})"
        ))
        .expect("valid regex literal")
    })
}

fn drop_conc_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)^DROP\s+INDEX\s+CONCURRENTLY\s+(?:(IF\s+EXISTS)\s+)?({IDENT})"
        ))
        .expect("valid regex literal")
    })
}

fn drop_if_exists_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?is)^DROP\s+INDEX\s+(?:CONCURRENTLY\s+)?IF\s+EXISTS\s+({IDENT})"
        ))
        .expect("valid regex literal")
    })
}

fn commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^COMMIT$").expect("valid regex literal"))
}

fn begin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^BEGIN$").expect("valid regex literal"))
}

const VARS_REQUIRED: &str =
    "at least one of $parallelism_global, $parallelism_per_host or $run_alone must be set";

/// Split a script into top-level statements with comments removed.
///
/// The scanner respects single-quoted literals (with `''` doubling),
/// double-quoted identifiers (with `""` doubling), dollar-quoted bodies and
/// nested block comments, so a `;` inside any of those never splits a
/// statement. Empty statements (leading or doubled semicolons) are dropped.
pub fn split_statements(body: &str) -> Vec<String> {
    let chars: Vec<char> = body.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '-' && chars.get(i + 1) == Some(&'-') {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            current.push(' ');
            continue;
        }

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let mut depth = 1;
            i += 2;
            while i < chars.len() && depth > 0 {
                if chars[i] == '/' && chars.get(i + 1) == Some(&'*') {
                    depth += 1;
                    i += 2;
                } else if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                    depth -= 1;
                    i += 2;
                } else {
                    i += 1;
                }
            }
            current.push(' ');
            continue;
        }

        if c == '\'' || c == '"' {
            current.push(c);
            i += 1;
            while i < chars.len() {
                current.push(chars[i]);
                if chars[i] == c {
                    i += 1;
                    break;
                }
                i += 1;
            }
            continue;
        }

        if c == '$' {
            if let Some(tag_len) = dollar_tag_len(&chars, i) {
                let tag: String = chars[i..i + tag_len].iter().collect();
                let mut j = i + tag_len;
                current.push_str(&tag);
                while j < chars.len() {
                    if chars[j] == '$' && starts_with_tag(&chars, j, &tag) {
                        current.push_str(&tag);
                        j += tag_len;
                        break;
                    }
                    current.push(chars[j]);
                    j += 1;
                }
                i = j;
                continue;
            }
        }

        if c == ';' {
            let stmt = current.trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
            i += 1;
            continue;
        }

        current.push(c);
        i += 1;
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() {
        statements.push(tail);
    }
    statements
}

/// Length of a `$tag$` opener at `start`, or `None` if this `$` is not one.
fn dollar_tag_len(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    while j < chars.len() && (chars[j].is_ascii_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    (chars.get(j) == Some(&'$')).then(|| j - start + 1)
}

fn starts_with_tag(chars: &[char], at: usize, tag: &str) -> bool {
    let tag_chars: Vec<char> = tag.chars().collect();
    chars.len() >= at + tag_chars.len() && chars[at..at + tag_chars.len()] == tag_chars[..]
}

/// Compare index identifiers the way the server would: unquoted names fold,
/// quoted names are verbatim.
fn idents_equal(a: &str, b: &str) -> bool {
    if a.starts_with('"') || b.starts_with('"') {
        a == b
    } else {
        a.eq_ignore_ascii_case(b)
    }
}

/// Classify a migration file and validate its concurrent-index contract.
///
/// On rejection the returned list opens with a line naming the triggering
/// construct, followed by one message per unmet requirement.
pub fn classify(body: &str, vars: &MigrationVars) -> Result<IndexWrap, Vec<String>> {
    let statements = split_statements(body);

    let creates: Vec<(usize, String)> = statements
        .iter()
        .enumerate()
        .filter_map(|(i, s)| create_conc_re().captures(s).map(|c| (i, c[1].to_string())))
        .collect();
    let drops: Vec<(usize, String, bool)> = statements
        .iter()
        .enumerate()
        .filter_map(|(i, s)| {
            drop_conc_re()
                .captures(s)
                .map(|c| (i, c[2].to_string(), c.get(1).is_some()))
        })
        .collect();

    if creates.is_empty() && drops.is_empty() {
        return Ok(IndexWrap::Transactional);
    }

    if !creates.is_empty() {
        let alone = statements.iter().all(|s| create_conc_re().is_match(s));
        if alone && vars.any_concurrency_limit() {
            return Ok(IndexWrap::CreateAlone {
                indexes: creates.into_iter().map(|(_, name)| name).collect(),
            });
        }

        let mut errors = vec![r#"(due to having "CREATE INDEX CONCURRENTLY")"#.to_string()];
        if !statements.first().is_some_and(|s| commit_re().is_match(s)) {
            errors.push(
                r#"the file must start with "COMMIT;" to close the outer transaction"#.to_string(),
            );
        }
        if !vars.any_concurrency_limit() {
            errors.push(VARS_REQUIRED.to_string());
        }
        for (pos, name) in &creates {
            let dropped_before = statements[..*pos].iter().any(|s| {
                drop_if_exists_re()
                    .captures(s)
                    .is_some_and(|c| idents_equal(&c[1], name))
            });
            if !dropped_before {
                errors.push(format!(
                    r#"the file must contain "DROP INDEX IF EXISTS {name};" somewhere before the index is created"#
                ));
            }
        }
        if !statements.last().is_some_and(|s| begin_re().is_match(s)) {
            errors.push(
                r#"the file must end with "BEGIN;" to reopen the transaction for the version bookkeeping"#
                    .to_string(),
            );
        }
        return if errors.len() > 1 {
            Err(errors)
        } else {
            Ok(IndexWrap::Sandwich)
        };
    }

    let alone = statements.iter().all(|s| drop_conc_re().is_match(s));
    if alone {
        let mut errors = vec![r#"(due to having "DROP INDEX CONCURRENTLY")"#.to_string()];
        for (_, name, if_exists) in &drops {
            if !if_exists {
                errors.push(format!(
                    r#"the statement must use "IF EXISTS" (e.g. "DROP INDEX CONCURRENTLY IF EXISTS {name};")"#
                ));
            }
        }
        return if errors.len() > 1 {
            Err(errors)
        } else {
            Ok(IndexWrap::DropAlone)
        };
    }

    let mut errors = vec![r#"(due to having "DROP INDEX CONCURRENTLY")"#.to_string()];
    if !statements.first().is_some_and(|s| commit_re().is_match(s)) {
        errors.push(
            r#"the file must start with "COMMIT;" to close the outer transaction"#.to_string(),
        );
    }
    if !statements.last().is_some_and(|s| begin_re().is_match(s)) {
        errors.push(
            r#"the file must end with "BEGIN;" to reopen the transaction for the version bookkeeping"#
                .to_string(),
        );
    }
    if errors.len() > 1 {
        Err(errors)
    } else {
        Ok(IndexWrap::Sandwich)
    }
}

/// Render the statements the executor feeds to the client for a file.
///
/// Alone files are surrounded by the sandwich; everything else is a plain
/// include, leaving the engine's transaction in charge.
pub fn wrap_statements(wrap: &IndexWrap, path: &Path) -> Vec<String> {
    match wrap {
        IndexWrap::CreateAlone { indexes } => {
            let mut stmts = vec!["COMMIT;".to_string()];
            for name in indexes {
                stmts.push(format!("DROP INDEX CONCURRENTLY IF EXISTS {name};"));
            }
            stmts.push(format!("\\i {}", path.display()));
            stmts.push("BEGIN;".to_string());
            stmts
        }
        IndexWrap::DropAlone => vec![
            "COMMIT;".to_string(),
            format!("\\i {}", path.display()),
            "BEGIN;".to_string(),
        ],
        IndexWrap::Transactional | IndexWrap::Sandwich => {
            vec![format!("\\i {}", path.display())]
        }
    }
}

#[cfg(test)]
#[path = "wrap_test.rs"]
mod tests;
