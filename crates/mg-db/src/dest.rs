//! Database endpoints and the transactional script wrapper.
//!
//! A `Dest` names one `(host, port, user, password, db, schema)` target. The
//! engine's contract is that a migration script and the update of the
//! schema's recorded version list commit as one unit, so `run_file` builds a
//! single client script that opens the transaction, includes the migration
//! file, replaces `mig_versions_const()` and commits.

use crate::error::{DbError, DbResult};
use crate::traits::{ExitResult, OnLine, SqlRunner};
use mg_core::registry::MigrationFile;
use mg_core::wrap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Schema used for fleet-level bookkeeping functions.
pub const DEFAULT_SCHEMA: &str = "public";

/// Database used only to create the target database.
const BOOTSTRAP_DB: &str = "postgres";

/// Version-list reads are batched in UNION ALL groups of this size.
const VERSIONS_BATCH: usize = 1000;

/// One `(host, port, user, password, db, schema)` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dest {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db: String,
    pub schema: String,
}

impl fmt::Display for Dest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}/{}", self.host, self.port, self.db, self.schema)
    }
}

impl Dest {
    pub fn new(host: &str, port: u16, user: &str, password: &str, db: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            db: db.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
        }
    }

    /// The bootstrap endpoint used only by `create_db`.
    pub fn no_db(&self) -> Self {
        let mut dest = self.clone();
        dest.db = BOOTSTRAP_DB.to_string();
        dest.schema = DEFAULT_SCHEMA.to_string();
        dest
    }

    /// The same endpoint addressed at another schema.
    pub fn with_schema(&self, schema: &str) -> Self {
        let mut dest = self.clone();
        dest.schema = schema.to_string();
        dest
    }

    /// Key used to order chains for stable progress output.
    pub fn sort_key(&self) -> (String, String, String) {
        (self.host.clone(), self.db.clone(), self.schema.clone())
    }

    /// Short `host:schema` label for collapsed shard listings.
    pub fn shard_label(&self) -> String {
        format!("{}:{}", self.host, self.schema)
    }

    /// Apply one migration file to this schema.
    ///
    /// The script and, when `new_versions` is given, the replacement of the
    /// schema's `mig_versions_const()` commit in the same transaction. Index
    /// files classified as "alone" carry their own sandwich (built by the
    /// wrap module) so the concurrent statements run outside the transaction
    /// while the bookkeeping still commits inside one.
    pub async fn run_file(
        &self,
        runner: &Arc<dyn SqlRunner>,
        file: &MigrationFile,
        new_versions: Option<&[String]>,
        on_line: OnLine<'_>,
    ) -> DbResult<ExitResult> {
        let script = self.build_script(file, new_versions)?;
        runner.run_script(self, &script, on_line).await
    }

    /// Build the full client script for one migration.
    pub fn build_script(
        &self,
        file: &MigrationFile,
        new_versions: Option<&[String]>,
    ) -> DbResult<String> {
        let mut script = String::new();
        script.push_str("SET statement_timeout TO 0;\n");
        script.push_str(&format!("SET search_path TO {};\n", quote_ident(&self.schema)));
        script.push_str("BEGIN;\n");
        for stmt in wrap::wrap_statements(&file.wrap, &file.path) {
            script.push_str(&stmt);
            script.push('\n');
        }
        if let Some(versions) = new_versions {
            let json = serde_json::to_string(versions)?;
            script.push_str(&versions_function_sql(&self.schema, &json));
            script.push('\n');
        }
        script.push_str(DISCARD_SUITE);
        script.push_str("COMMIT;\n");
        Ok(script)
    }

    /// List schemas eligible as microshards: everything except system
    /// namespaces and names containing an underscore.
    pub async fn load_schemas(&self, runner: &Arc<dyn SqlRunner>) -> DbResult<Vec<String>> {
        let rows = runner
            .run_query(
                self,
                "SELECT nspname FROM pg_catalog.pg_namespace ORDER BY nspname",
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter(|name| is_shard_schema(name))
            .collect())
    }

    /// Read the applied version list of every given schema.
    ///
    /// One catalog query finds which schemas expose `mig_versions_const`;
    /// those are then read in UNION ALL batches. Schemas without the
    /// function report an empty list.
    pub async fn load_versions_by_schema(
        &self,
        runner: &Arc<dyn SqlRunner>,
        schemas: &[String],
    ) -> DbResult<HashMap<String, Vec<String>>> {
        let mut out: HashMap<String, Vec<String>> =
            schemas.iter().map(|s| (s.clone(), Vec::new())).collect();

        let rows = runner
            .run_query(
                self,
                "SELECT n.nspname FROM pg_catalog.pg_proc p \
                 JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace \
                 WHERE p.proname = 'mig_versions_const'",
            )
            .await?;
        let have: HashSet<String> = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect();

        let targets: Vec<&String> = schemas.iter().filter(|s| have.contains(*s)).collect();
        for batch in targets.chunks(VERSIONS_BATCH) {
            let sql = batch
                .iter()
                .map(|schema| {
                    format!(
                        "SELECT {} AS schema_name, {}.mig_versions_const() AS versions",
                        quote_literal(schema),
                        quote_ident(schema)
                    )
                })
                .collect::<Vec<_>>()
                .join("\nUNION ALL\n");
            let rows = runner.run_query(self, &sql).await?;
            for row in rows {
                let mut fields = row.into_iter();
                let (Some(schema), Some(json)) = (fields.next(), fields.next()) else {
                    return Err(DbError::BadRows {
                        target: self.to_string(),
                        message: "expected (schema, versions) pairs".to_string(),
                    });
                };
                let versions: Vec<String> = serde_json::from_str(&json)?;
                out.insert(schema, versions);
            }
        }
        Ok(out)
    }

    /// Create this endpoint's database if it does not exist.
    ///
    /// Connectivity failures (server unreachable, still starting up) retry
    /// every second, invoking `on_retry` with the message each time; any
    /// other failure surfaces immediately.
    pub async fn create_db(
        &self,
        runner: &Arc<dyn SqlRunner>,
        on_retry: &(dyn Fn(&str) + Send + Sync),
    ) -> DbResult<()> {
        let boot = self.no_db();
        let probe = format!(
            "SELECT 1 FROM pg_database WHERE datname = {}",
            quote_literal(&self.db)
        );
        loop {
            match runner.run_query(&boot, &probe).await {
                Ok(rows) if !rows.is_empty() => return Ok(()),
                Ok(_) => {
                    let create = format!("CREATE DATABASE {}", quote_ident(&self.db));
                    match runner.run_query(&boot, &create).await {
                        Ok(_) => return Ok(()),
                        Err(e) if e.is_connectivity() => {
                            on_retry(&e.to_string());
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                        // Lost a creation race with a sibling worker.
                        Err(DbError::QueryFailed { stderr, .. })
                            if stderr.contains("already exists") =>
                        {
                            return Ok(())
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_connectivity() => {
                    on_retry(&e.to_string());
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Session cleanup appended to every migration so pooled connections come
/// back clean: cursors, prepared statements, listeners, advisory locks and
/// cached state are all discarded.
const DISCARD_SUITE: &str = "CLOSE ALL;\n\
    RESET ALL;\n\
    DEALLOCATE ALL;\n\
    UNLISTEN *;\n\
    SELECT pg_advisory_unlock_all();\n\
    DISCARD PLANS;\n\
    DISCARD TEMP;\n\
    DISCARD SEQUENCES;\n";

/// SQL replacing a schema's version-list function with a new constant.
pub(crate) fn versions_function_sql(schema: &str, json: &str) -> String {
    format!(
        "CREATE OR REPLACE FUNCTION {}.mig_versions_const() RETURNS text LANGUAGE sql AS $mig$SELECT {}::text$mig$;",
        quote_ident(schema),
        quote_literal(json)
    )
}

/// Is this namespace a candidate microshard?
pub fn is_shard_schema(name: &str) -> bool {
    !name.starts_with("pg_") && name != "information_schema" && !name.contains('_')
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Single-quote a literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
#[path = "dest_test.rs"]
mod tests;
