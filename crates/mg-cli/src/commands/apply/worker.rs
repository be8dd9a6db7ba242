//! Worker: executes a queue of chains sequentially.
//!
//! Each worker pops chains off a shared queue and runs every migration of a
//! chain in order, acquiring the exclusion lock and both named semaphores
//! before each script. A failing migration abandons the remainder of its
//! chain only; sibling chains keep running.

use indicatif::ProgressBar;
use mg_core::patch::{ChainKind, Migration};
use mg_db::{Dest, SqlRunner};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{RwLockReadGuard, RwLockWriteGuard};

use super::locks::MigrationLocks;

/// The ordered migrations for one schema in one run.
#[derive(Debug, Clone)]
pub struct Chain {
    pub kind: ChainKind,
    pub dest: Dest,
    pub migrations: Vec<Migration>,
}

/// A failed script execution.
#[derive(Debug, Clone)]
pub struct MigrationFailure {
    pub dest: Dest,
    pub version: String,
    pub output: String,
}

/// A `WARNING:` picked up from a script's stderr; non-fatal.
#[derive(Debug, Clone)]
pub struct MigrationWarning {
    pub dest: Dest,
    pub version: String,
    pub message: String,
}

/// Counters and findings accumulated by one worker.
#[derive(Debug, Default)]
pub struct WorkerOutcome {
    pub succeeded: usize,
    pub errors: Vec<MigrationFailure>,
    pub warnings: Vec<MigrationWarning>,
}

/// Shared chain queue; workers on the same host pop from the same queue.
pub type ChainQueue = Arc<Mutex<VecDeque<Chain>>>;

/// Acquire a mutex lock, recovering from a poisoned state if necessary.
fn recover_mutex<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|p| {
        eprintln!("[warn] mutex poisoned, recovering");
        p.into_inner()
    })
}

enum AloneGuard<'a> {
    Read(#[allow(dead_code)] RwLockReadGuard<'a, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'a, ()>),
}

pub struct Worker {
    runner: Arc<dyn SqlRunner>,
    locks: Arc<MigrationLocks>,
    queue: ChainQueue,
    progress: Option<ProgressBar>,
}

impl Worker {
    pub fn new(
        runner: Arc<dyn SqlRunner>,
        locks: Arc<MigrationLocks>,
        queue: ChainQueue,
        progress: Option<ProgressBar>,
    ) -> Self {
        Self {
            runner,
            locks,
            queue,
            progress,
        }
    }

    /// Drain the queue. Each popped chain is executed by exactly this worker,
    /// strictly in order.
    pub async fn run(self) -> WorkerOutcome {
        let mut outcome = WorkerOutcome::default();
        loop {
            let chain = recover_mutex(&self.queue).pop_front();
            let Some(chain) = chain else { break };
            self.run_chain(&chain, &mut outcome).await;
        }
        if let Some(pb) = &self.progress {
            pb.finish_and_clear();
        }
        outcome
    }

    async fn run_chain(&self, chain: &Chain, outcome: &mut WorkerOutcome) {
        for migration in &chain.migrations {
            let vars = &migration.file.vars;
            self.status(&format!(
                "{} {} (waiting)",
                chain.dest.shard_label(),
                migration.version
            ));

            // The exclusion lock comes first: a reader acquired behind a
            // waiting writer while already holding a semaphore would
            // deadlock the run-alone migration.
            let _alone = if vars.run_alone {
                AloneGuard::Write(self.locks.run_alone().write().await)
            } else {
                AloneGuard::Read(self.locks.run_alone().read().await)
            };
            let global = self
                .locks
                .named(&migration.version, vars.parallelism_global)
                .await;
            let Ok(_global_permit) = global.acquire_owned().await else {
                // Semaphore closed -- treat as cancellation
                return;
            };
            let per_host = self
                .locks
                .named(
                    &format!("{}:{}", chain.dest.host, migration.version),
                    vars.parallelism_per_host,
                )
                .await;
            let Ok(_per_host_permit) = per_host.acquire_owned().await else {
                return;
            };

            self.status(&format!(
                "{} {}",
                chain.dest.shard_label(),
                migration.version
            ));
            let result = chain
                .dest
                .run_file(
                    &self.runner,
                    &migration.file,
                    migration.new_versions.as_deref(),
                    &|line| {
                        self.status(&format!(
                            "{} {}: {}",
                            chain.dest.shard_label(),
                            migration.version,
                            line
                        ))
                    },
                )
                .await;

            match result {
                Ok(res) if res.success() => {
                    outcome.succeeded += 1;
                    if res.warning {
                        outcome.warnings.push(MigrationWarning {
                            dest: chain.dest.clone(),
                            version: migration.version.clone(),
                            message: last_warning_line(&res.stderr),
                        });
                    }
                    if vars.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(vars.delay_ms)).await;
                    }
                }
                Ok(res) => {
                    outcome.errors.push(MigrationFailure {
                        dest: chain.dest.clone(),
                        version: migration.version.clone(),
                        output: res.failure_output(),
                    });
                    // Abandon the rest of this chain; later migrations
                    // depend on this one having committed.
                    return;
                }
                Err(e) => {
                    outcome.errors.push(MigrationFailure {
                        dest: chain.dest.clone(),
                        version: migration.version.clone(),
                        output: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    fn status(&self, message: &str) {
        if let Some(pb) = &self.progress {
            pb.set_message(message.to_string());
        }
    }
}

/// The last `WARNING:` line of a stderr capture.
fn last_warning_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| line.contains("WARNING:"))
        .unwrap_or("WARNING")
        .trim()
        .to_string()
}

#[cfg(test)]
#[path = "worker_test.rs"]
mod tests;
