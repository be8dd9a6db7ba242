//! Apply/undo orchestration.
//!
//! Split into submodules:
//! - `locks` — the process-wide exclusion lock and named semaphore table
//! - `worker` — sequential chain execution with token acquisition
//! - `grid` — the three-phase BEFORE -> MAIN -> AFTER executor
//!
//! The orchestrator plans chains against the live fleet, runs the grid, and
//! maintains the digest / rerun-fingerprint protocol around it: the
//! fingerprint is cleared before any mutation and restored only on full
//! success, and digests are written so a deployer comparing
//! lexicographically always sees the fleet's true low-water mark.

mod grid;
mod locks;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mg_core::digest::{choose_best_digest, reset_digest, RESET_AFTER_UNDO, RESET_BEFORE_UNDO};
use mg_core::patch::{self, ChainKind, Migration};
use mg_core::ranges::collapse_ranges;
use mg_core::registry::{extract_version, MigrationFile, Registry};
use mg_db::digest_io::{self, FingerprintWrite};
use mg_db::{Dest, PsqlRunner, SqlRunner};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::cli::{ApplyArgs, GlobalArgs, OutputFormat, UndoArgs};
use crate::commands::common::{self, ExitCode};

use grid::{Grid, GridOutcome};
use locks::MigrationLocks;
use worker::Chain;

struct ActionOptions {
    undo: Option<String>,
    createdb: bool,
    workers_per_host: usize,
    dry: bool,
    force: bool,
    output: OutputFormat,
}

/// Execute the apply command
pub(crate) async fn execute(args: &ApplyArgs, global: &GlobalArgs) -> Result<()> {
    run_action(
        global,
        ActionOptions {
            undo: None,
            createdb: args.createdb,
            workers_per_host: args.parallelism,
            dry: args.dry,
            force: args.force,
            output: args.output,
        },
    )
    .await
}

/// Execute the undo command
pub(crate) async fn execute_undo(args: &UndoArgs, global: &GlobalArgs) -> Result<()> {
    run_action(
        global,
        ActionOptions {
            undo: Some(extract_version(&args.version)),
            createdb: false,
            workers_per_host: args.parallelism,
            dry: args.dry,
            force: false,
            output: args.output,
        },
    )
    .await
}

/// One error or warning in a machine-readable run report.
#[derive(Debug, Serialize)]
struct ReportItem {
    dest: String,
    version: String,
    message: String,
}

/// Machine-readable run report for CI integration.
#[derive(Debug, Serialize)]
struct RunReport {
    timestamp: DateTime<Utc>,
    elapsed_secs: f64,
    planned: usize,
    processed: usize,
    succeeded: usize,
    failed: usize,
    errors: Vec<ReportItem>,
    warnings: Vec<ReportItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Done,
    HasMoreWork,
    Failed,
}

async fn run_action(global: &GlobalArgs, opts: ActionOptions) -> Result<()> {
    let registry = common::load_registry(global)?;
    let hosts = common::parse_hosts(global)?;

    let psql = PsqlRunner::new();
    psql.check_available()
        .context("psql is required on PATH")?;
    let runner: Arc<dyn SqlRunner> = Arc::new(psql);

    if opts.createdb {
        for dest in &hosts {
            dest.create_db(&runner, &|message| {
                eprintln!("[retry] waiting for {}: {}", dest.host, message)
            })
            .await
            .with_context(|| format!("Failed to create database on {}", dest.host))?;
        }
    }

    let dep_bodies: Vec<&str> = registry
        .before()
        .iter()
        .chain(registry.after().iter())
        .map(|file| file.body.as_str())
        .collect();

    run_to_completion(&registry, &runner, &hosts, &dep_bodies, &opts, global).await
}

/// Drive passes until no work remains or one fails.
async fn run_to_completion(
    registry: &Registry,
    runner: &Arc<dyn SqlRunner>,
    hosts: &[Dest],
    dep_bodies: &[&str],
    opts: &ActionOptions,
    global: &GlobalArgs,
) -> Result<()> {
    loop {
        match run_once(registry, runner, hosts, dep_bodies, opts, global).await? {
            RunOutcome::Done => return Ok(()),
            RunOutcome::Failed => return Err(ExitCode(1).into()),
            RunOutcome::HasMoreWork => {
                // Schemas that appeared mid-run, or chains left short by a
                // concurrent operator, are picked up by another pass.
                log::debug!("More work found after a successful pass; planning again");
            }
        }
    }
}

async fn run_once(
    registry: &Registry,
    runner: &Arc<dyn SqlRunner>,
    hosts: &[Dest],
    dep_bodies: &[&str],
    opts: &ActionOptions,
    global: &GlobalArgs,
) -> Result<RunOutcome> {
    let start = Instant::now();
    let json_mode = opts.output == OutputFormat::Json;
    let chains = plan_chains(registry, runner, hosts, opts.undo.as_deref()).await?;

    if chains.is_empty() {
        if let Some(version) = &opts.undo {
            if json_mode {
                print_json_report(&GridOutcome::default(), start)?;
            } else {
                println!("Nothing to undo: {version} is not the latest version on any schema.");
            }
            return Ok(RunOutcome::Done);
        }
        if !opts.force && digest_io::check_rerun_fingerprints(runner, hosts, dep_bodies).await {
            if !opts.dry {
                reconcile_digest(registry, runner, hosts).await?;
            }
            if json_mode {
                print_json_report(&GridOutcome::default(), start)?;
            } else {
                println!("Nothing to do: every schema is up to date.");
            }
            return Ok(RunOutcome::Done);
        }
    }

    if opts.dry {
        print_plan(&chains, opts.output)?;
        return Ok(RunOutcome::Done);
    }

    // Pre-phase writes. An undo marks the fleet below any code digest
    // before the first dn script runs, so a partial undo is never mistaken
    // for a deployable state. The fingerprint is cleared so a crash
    // anywhere below forces a before/after replay.
    if opts.undo.is_some() && !chains.is_empty() {
        digest_io::save_digests(runner, hosts, &reset_digest(RESET_BEFORE_UNDO)).await;
    }
    digest_io::save_rerun_fingerprints(runner, hosts, dep_bodies, FingerprintWrite::Reset)
        .await
        .context("Failed to clear rerun fingerprints")?;

    let before_chains = hook_chains(registry.before(), hosts, ChainKind::Dn, "before");
    let after_chains = hook_chains(registry.after(), hosts, ChainKind::Up, "after");

    let locks = Arc::new(MigrationLocks::new());
    let outcome = Grid::new(
        Arc::clone(runner),
        locks,
        opts.workers_per_host,
        !global.verbose && !json_mode,
    )
    .with_before(before_chains)
    .with_main(chains.clone())
    .with_after(after_chains)
    .run()
    .await;

    if json_mode {
        print_json_report(&outcome, start)?;
    } else {
        render_report(&outcome, &chains);
    }

    if !outcome.ok() {
        return Ok(RunOutcome::Failed);
    }

    // Post-phase writes.
    digest_io::save_rerun_fingerprints(runner, hosts, dep_bodies, FingerprintWrite::UpToDate)
        .await
        .context("Failed to save rerun fingerprints")?;

    match &opts.undo {
        None => {
            let remaining = plan_chains(registry, runner, hosts, None).await?;
            if !remaining.is_empty() {
                return Ok(RunOutcome::HasMoreWork);
            }
            digest_io::save_digests(runner, hosts, &registry.digest()).await;
        }
        Some(_) => {
            digest_io::save_digests(runner, hosts, &reset_digest(RESET_AFTER_UNDO)).await;
        }
    }
    Ok(RunOutcome::Done)
}

/// Plan one chain per (host, schema) with pending work.
async fn plan_chains(
    registry: &Registry,
    runner: &Arc<dyn SqlRunner>,
    hosts: &[Dest],
    undo: Option<&str>,
) -> Result<Vec<Chain>> {
    let mut chains = Vec::new();
    for host in hosts {
        let schemas = host
            .load_schemas(runner)
            .await
            .with_context(|| format!("Failed to list schemas on {}", host.host))?;
        let groups = registry.group_by_schema(&schemas)?;
        let targets: Vec<String> = groups.keys().cloned().collect();
        let versions_by_schema = host
            .load_versions_by_schema(runner, &targets)
            .await
            .with_context(|| format!("Failed to read version lists on {}", host.host))?;

        for (schema, entries) in &groups {
            let applied = versions_by_schema
                .get(schema)
                .cloned()
                .unwrap_or_default();
            let dest = host.with_schema(schema);
            match undo {
                None => {
                    let migrations = patch::plan_up(schema, entries, &applied)?;
                    if !migrations.is_empty() {
                        chains.push(Chain {
                            kind: ChainKind::Up,
                            dest,
                            migrations,
                        });
                    }
                }
                Some(version) => {
                    if let Some(migration) = patch::plan_undo(schema, entries, &applied, version)? {
                        chains.push(Chain {
                            kind: ChainKind::Dn,
                            dest,
                            migrations: vec![migration],
                        });
                    }
                }
            }
        }
    }
    chains.sort_by_key(|chain| chain.dest.sort_key());
    Ok(chains)
}

/// One hook chain per host; hook scripts never touch version lists.
fn hook_chains(
    file: Option<&Arc<MigrationFile>>,
    hosts: &[Dest],
    kind: ChainKind,
    version: &str,
) -> Vec<Chain> {
    let Some(file) = file else {
        return Vec::new();
    };
    hosts
        .iter()
        .map(|host| Chain {
            kind,
            dest: host.clone(),
            migrations: vec![Migration {
                version: version.to_string(),
                file: Arc::clone(file),
                new_versions: None,
            }],
        })
        .collect()
}

/// Re-read every host's digest and persist the code digest if the fleet's
/// reconciled view lags behind it.
async fn reconcile_digest(
    registry: &Registry,
    runner: &Arc<dyn SqlRunner>,
    hosts: &[Dest],
) -> Result<()> {
    let stored = digest_io::load_digests(runner, hosts).await?;
    let best = choose_best_digest(stored.iter().map(String::as_str));
    let code = registry.digest();
    if best != code {
        digest_io::save_digests(runner, hosts, &code).await;
    }
    Ok(())
}

/// A plan group: targets that share the same action and pending versions.
#[derive(Debug, Serialize)]
struct PlanGroup {
    action: &'static str,
    targets: Vec<String>,
    versions: Vec<String>,
}

fn plan_groups(chains: &[Chain]) -> Vec<PlanGroup> {
    let mut groups: BTreeMap<(&'static str, Vec<String>), Vec<String>> = BTreeMap::new();
    for chain in chains {
        let action = match chain.kind {
            ChainKind::Up => "apply",
            ChainKind::Dn => "undo",
        };
        let versions: Vec<String> = chain.migrations.iter().map(|m| m.version.clone()).collect();
        groups
            .entry((action, versions))
            .or_default()
            .push(chain.dest.shard_label());
    }
    groups
        .into_iter()
        .map(|((action, versions), labels)| PlanGroup {
            action,
            targets: collapse_ranges(&labels),
            versions,
        })
        .collect()
}

fn print_plan(chains: &[Chain], output: OutputFormat) -> Result<()> {
    let groups = plan_groups(chains);
    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }
    let total: usize = chains.iter().map(|c| c.migrations.len()).sum();
    println!("Plan: {} chain(s), {} migration(s)", chains.len(), total);
    for group in groups {
        for target in &group.targets {
            println!("  {}: {} {}", target, group.action, group.versions.join(", "));
        }
    }
    Ok(())
}

fn print_json_report(outcome: &GridOutcome, start: Instant) -> Result<()> {
    let report = RunReport {
        timestamp: Utc::now(),
        elapsed_secs: start.elapsed().as_secs_f64(),
        planned: outcome.total,
        processed: outcome.processed(),
        succeeded: outcome.succeeded,
        failed: outcome.errors.len(),
        errors: outcome
            .errors
            .iter()
            .map(|e| ReportItem {
                dest: e.dest.to_string(),
                version: e.version.clone(),
                message: e.output.clone(),
            })
            .collect(),
        warnings: outcome
            .warnings
            .iter()
            .map(|w| ReportItem {
                dest: w.dest.to_string(),
                version: w.version.clone(),
                message: w.message.clone(),
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn render_report(outcome: &GridOutcome, chains: &[Chain]) {
    println!();
    for error in &outcome.errors {
        println!("  \u{2717} {} {}", error.dest, error.version);
        for line in error.output.lines() {
            println!("      {line}");
        }
    }
    for warning in &outcome.warnings {
        println!(
            "  ! {} {}: {}",
            warning.dest, warning.version, warning.message
        );
    }
    if outcome.ok() && !chains.is_empty() {
        let labels: Vec<String> = chains.iter().map(|c| c.dest.shard_label()).collect();
        for line in collapse_ranges(&labels) {
            println!("  \u{2713} {line}");
        }
    }
    if outcome.failed_workers > 0 {
        println!("  {} worker(s) recorded errors", outcome.failed_workers);
    }
    println!(
        "Completed: {} succeeded, {} failed ({} planned)",
        outcome.succeeded,
        outcome.errors.len(),
        outcome.total
    );
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
