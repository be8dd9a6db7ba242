//! Test support: an in-memory SQL runner with concurrency probes.
//!
//! The fake runner recognizes the `\i /mig/<version>.up.sql` include line the
//! script wrapper emits and tracks, per version and per host:version, how
//! many scripts overlap in flight. Tests assert on the recorded highs.

use async_trait::async_trait;
use mg_core::patch::{ChainKind, Migration};
use mg_core::registry::MigrationFile;
use mg_core::vars::MigrationVars;
use mg_db::{Dest, DbResult, ExitResult, OnLine, SqlRunner};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::worker::Chain;

#[derive(Debug, Default)]
pub(crate) struct Probe {
    pub current: usize,
    pub max_seen: usize,
    pub current_by_version: HashMap<String, usize>,
    pub max_by_version: HashMap<String, usize>,
    pub current_by_host_version: HashMap<String, usize>,
    pub max_by_host_version: HashMap<String, usize>,
    /// Times a script overlapped with a run-alone script.
    pub alone_violations: usize,
    /// `host:schema version` labels in start order.
    pub calls: Vec<String>,
}

pub(crate) struct FakeRunner {
    pub probe: Mutex<Probe>,
    /// Versions whose scripts exit non-zero.
    pub fail: HashSet<String>,
    /// Versions whose scripts print a WARNING to stderr.
    pub warn: HashSet<String>,
    /// Versions the probe treats as run-alone for violation counting.
    pub alone: HashSet<String>,
    /// Simulated script runtime, long enough to force overlap.
    pub work: Duration,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            probe: Mutex::new(Probe::default()),
            fail: HashSet::new(),
            warn: HashSet::new(),
            alone: HashSet::new(),
            work: Duration::from_millis(20),
        }
    }
}

fn script_version(script: &str) -> String {
    script
        .lines()
        .find_map(|line| line.strip_prefix("\\i /mig/"))
        .and_then(|rest| rest.strip_suffix(".up.sql"))
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl SqlRunner for FakeRunner {
    async fn run_script(
        &self,
        dest: &Dest,
        script: &str,
        on_line: OnLine<'_>,
    ) -> DbResult<ExitResult> {
        let version = script_version(script);
        let host_key = format!("{}:{}", dest.host, version);

        {
            let mut probe = self.probe.lock().unwrap();
            let others_running = probe.current > 0;
            let alone_running = probe
                .current_by_version
                .iter()
                .any(|(v, n)| *n > 0 && self.alone.contains(v));
            if (self.alone.contains(&version) && others_running) || alone_running {
                probe.alone_violations += 1;
            }

            probe.current += 1;
            probe.max_seen = probe.max_seen.max(probe.current);
            let by_version = probe.current_by_version.entry(version.clone()).or_default();
            *by_version += 1;
            let high = *by_version;
            let max = probe.max_by_version.entry(version.clone()).or_default();
            *max = (*max).max(high);
            let by_host = probe
                .current_by_host_version
                .entry(host_key.clone())
                .or_default();
            *by_host += 1;
            let high = *by_host;
            let max = probe.max_by_host_version.entry(host_key.clone()).or_default();
            *max = (*max).max(high);
            probe
                .calls
                .push(format!("{} {}", dest.shard_label(), version));
        }

        on_line(&format!("running {version}"));
        tokio::time::sleep(self.work).await;

        {
            let mut probe = self.probe.lock().unwrap();
            probe.current -= 1;
            *probe
                .current_by_version
                .get_mut(&version)
                .expect("version was registered") -= 1;
            *probe
                .current_by_host_version
                .get_mut(&host_key)
                .expect("host:version was registered") -= 1;
        }

        let failed = self.fail.contains(&version);
        let warned = self.warn.contains(&version);
        Ok(ExitResult {
            code: if failed { 1 } else { 0 },
            stdout: format!("ran {version}\n"),
            stderr: if failed {
                "ERROR: simulated failure".to_string()
            } else if warned {
                "WARNING: simulated warning".to_string()
            } else {
                String::new()
            },
            warning: warned,
        })
    }

    async fn run_query(&self, _dest: &Dest, _sql: &str) -> DbResult<Vec<Vec<String>>> {
        Ok(Vec::new())
    }
}

/// Slice `s` between the first `from` marker and the next `to` marker.
fn between<'a>(s: &'a str, from: &str, to: &str) -> Option<&'a str> {
    let start = s.find(from)? + from.len();
    let end = s[start..].find(to)? + start;
    Some(&s[start..end])
}

#[derive(Default)]
struct HostState {
    schemas: Vec<String>,
    /// Constant functions keyed by (schema, function name).
    fns: HashMap<(String, String), String>,
}

#[derive(Default)]
struct FleetState {
    hosts: HashMap<String, HostState>,
    /// `host:schema version` labels in execution order.
    scripts: Vec<String>,
}

/// A stateful fake fleet for orchestrator-level tests.
///
/// Answers the catalog and bookkeeping queries the planner issues, and
/// executing a script applies the `mig_versions_const()` replacement it
/// carries, so a second planning pass sees the committed state. A failing
/// script leaves the version list untouched, modelling the rollback.
pub(crate) struct FakeFleet {
    state: Mutex<FleetState>,
    fail: Mutex<HashSet<String>>,
}

impl FakeFleet {
    pub fn new(hosts: &[(&str, &[&str])]) -> Self {
        let mut map = HashMap::new();
        for (host, schemas) in hosts {
            map.insert(
                host.to_string(),
                HostState {
                    schemas: schemas.iter().map(|s| s.to_string()).collect(),
                    fns: HashMap::new(),
                },
            );
        }
        Self {
            state: Mutex::new(FleetState {
                hosts: map,
                scripts: Vec::new(),
            }),
            fail: Mutex::new(HashSet::new()),
        }
    }

    pub fn set_fail(&self, version: &str) {
        self.fail.lock().unwrap().insert(version.to_string());
    }

    pub fn clear_fail(&self) {
        self.fail.lock().unwrap().clear();
    }

    pub fn script_count(&self) -> usize {
        self.state.lock().unwrap().scripts.len()
    }

    pub fn scripts(&self) -> Vec<String> {
        self.state.lock().unwrap().scripts.clone()
    }

    pub fn fn_value(&self, host: &str, schema: &str, name: &str) -> Option<String> {
        self.state.lock().unwrap().hosts[host]
            .fns
            .get(&(schema.to_string(), name.to_string()))
            .cloned()
    }

    pub fn remove_fn(&self, host: &str, schema: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .hosts
            .get_mut(host)
            .expect("known host")
            .fns
            .remove(&(schema.to_string(), name.to_string()));
    }

    /// The applied version list a schema reports, decoded from its stored
    /// `mig_versions_const()`.
    pub fn versions(&self, host: &str, schema: &str) -> Vec<String> {
        self.fn_value(host, schema, "mig_versions_const")
            .map(|json| serde_json::from_str(&json).expect("stored version list is JSON"))
            .unwrap_or_default()
    }
}

#[async_trait]
impl SqlRunner for FakeFleet {
    async fn run_script(
        &self,
        dest: &Dest,
        script: &str,
        _on_line: OnLine<'_>,
    ) -> DbResult<ExitResult> {
        let file_name = script
            .lines()
            .find_map(|line| line.strip_prefix("\\i "))
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default();
        let version = file_name
            .strip_suffix(".up.sql")
            .or_else(|| file_name.strip_suffix(".dn.sql"))
            .or_else(|| file_name.strip_suffix(".sql"))
            .unwrap_or(file_name)
            .to_string();
        let schema = between(script, "SET search_path TO \"", "\";")
            .unwrap_or_default()
            .to_string();

        let failed = self.fail.lock().unwrap().contains(&version);
        let mut state = self.state.lock().unwrap();
        state.scripts.push(format!("{}:{} {}", dest.host, schema, version));
        if !failed {
            if let Some(update) = between(script, "CREATE OR REPLACE FUNCTION \"", "$mig$;") {
                let target = update.split('"').next().unwrap_or_default().to_string();
                let value = between(update, "$mig$SELECT '", "'::text")
                    .unwrap_or_default()
                    .replace("''", "'");
                state
                    .hosts
                    .get_mut(&dest.host)
                    .expect("known host")
                    .fns
                    .insert((target, "mig_versions_const".to_string()), value);
            }
        }

        Ok(ExitResult {
            code: if failed { 1 } else { 0 },
            stdout: String::new(),
            stderr: if failed {
                "ERROR: simulated failure".to_string()
            } else {
                String::new()
            },
            warning: false,
        })
    }

    async fn run_query(&self, dest: &Dest, sql: &str) -> DbResult<Vec<Vec<String>>> {
        let mut state = self.state.lock().unwrap();
        let host = state.hosts.get_mut(&dest.host).expect("known host");

        if sql.contains("pg_catalog.pg_namespace") && !sql.contains("pg_proc") {
            return Ok(host.schemas.iter().map(|s| vec![s.clone()]).collect());
        }

        if sql.contains("pg_catalog.pg_proc") {
            if sql.contains("nspname =") {
                let name = between(sql, "p.proname = '", "'").unwrap_or_default();
                let schema = between(sql, "n.nspname = '", "'").unwrap_or_default();
                let exists = host
                    .fns
                    .contains_key(&(schema.to_string(), name.to_string()));
                return Ok(if exists {
                    vec![vec!["1".to_string()]]
                } else {
                    Vec::new()
                });
            }
            return Ok(host
                .fns
                .keys()
                .filter(|(_, name)| name == "mig_versions_const")
                .map(|(schema, _)| vec![schema.clone()])
                .collect());
        }

        if sql.contains("mig_versions_const() AS versions") {
            let mut rows = Vec::new();
            for part in sql.split("UNION ALL") {
                let Some(schema) = between(part, "SELECT '", "' AS schema_name") else {
                    continue;
                };
                let value = host
                    .fns
                    .get(&(schema.to_string(), "mig_versions_const".to_string()))
                    .cloned()
                    .unwrap_or_default();
                rows.push(vec![schema.to_string(), value]);
            }
            return Ok(rows);
        }

        if sql.starts_with("CREATE OR REPLACE FUNCTION \"") {
            let schema = between(sql, "FUNCTION \"", "\".").unwrap_or_default().to_string();
            let name = between(sql, &format!("\"{schema}\"."), "()")
                .unwrap_or_default()
                .to_string();
            let value = between(sql, "$mig$SELECT '", "'::text$mig$")
                .unwrap_or_default()
                .replace("''", "'");
            host.fns.insert((schema, name), value);
            return Ok(Vec::new());
        }

        if sql.starts_with("SELECT \"") {
            let schema = between(sql, "SELECT \"", "\".").unwrap_or_default();
            let name = between(sql, "\".", "()").unwrap_or_default();
            let value = host
                .fns
                .get(&(schema.to_string(), name.to_string()))
                .cloned()
                .unwrap_or_default();
            return Ok(vec![vec![value]]);
        }

        panic!("unexpected query: {sql}");
    }
}

/// A migration file that never touches disk; the version is encoded in the
/// path so the fake runner can recover it from the include line.
pub(crate) fn file_for(version: &str, body: &str) -> Arc<MigrationFile> {
    let vars = MigrationVars::parse("test.sql", body).unwrap();
    let wrap = mg_core::wrap::classify(body, &vars).unwrap();
    Arc::new(MigrationFile {
        path: PathBuf::from(format!("/mig/{version}.up.sql")),
        file_name: format!("{version}.up.sql"),
        body: body.to_string(),
        vars,
        wrap,
    })
}

pub(crate) fn migration(version: &str, body: &str) -> Migration {
    Migration {
        version: version.to_string(),
        file: file_for(version, body),
        new_versions: Some(vec![version.to_string()]),
    }
}

pub(crate) fn chain(host: &str, schema: &str, migrations: Vec<Migration>) -> Chain {
    Chain {
        kind: ChainKind::Up,
        dest: Dest::new(host, 5432, "postgres", "", "fleet").with_schema(schema),
        migrations,
    }
}
