//! Grid: the three-phase concurrent executor.
//!
//! Explicit state machine BEFORE -> MAIN -> AFTER -> DONE with a barrier
//! between phases. The before phase runs one worker per host and aborts the
//! run on any error; the main phase allocates up to `workers_per_host`
//! workers per host over a shared per-host queue; the after phase always
//! runs, even when main failed, because `after.sql` is cleanup.

use indicatif::{MultiProgress, ProgressBar};
use mg_db::SqlRunner;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;

use super::locks::MigrationLocks;
use super::worker::{Chain, MigrationFailure, MigrationWarning, Worker, WorkerOutcome};

/// Progress heartbeat interval.
const TICK: Duration = Duration::from_millis(200);

/// Aggregated result of a grid run.
#[derive(Debug, Default)]
pub struct GridOutcome {
    /// Main-phase migrations planned at phase start.
    pub total: usize,

    /// Scripts that committed.
    pub succeeded: usize,

    /// Failed scripts, across all phases.
    pub errors: Vec<MigrationFailure>,

    /// Non-fatal warnings, across all phases.
    pub warnings: Vec<MigrationWarning>,

    /// Workers that recorded at least one error.
    pub failed_workers: usize,
}

impl GridOutcome {
    /// True when every phase completed without errors.
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Migrations that reached a terminal state (committed or failed).
    pub fn processed(&self) -> usize {
        self.succeeded + self.errors.len()
    }

    fn absorb(&mut self, worker: WorkerOutcome) {
        if !worker.errors.is_empty() {
            self.failed_workers += 1;
        }
        self.succeeded += worker.succeeded;
        self.errors.extend(worker.errors);
        self.warnings.extend(worker.warnings);
    }
}

pub struct Grid {
    runner: Arc<dyn SqlRunner>,
    locks: Arc<MigrationLocks>,
    workers_per_host: usize,
    show_progress: bool,
    before: Vec<Chain>,
    main: Vec<Chain>,
    after: Vec<Chain>,
}

impl Grid {
    pub fn new(
        runner: Arc<dyn SqlRunner>,
        locks: Arc<MigrationLocks>,
        workers_per_host: usize,
        show_progress: bool,
    ) -> Self {
        Self {
            runner,
            locks,
            workers_per_host: workers_per_host.max(1),
            show_progress,
            before: Vec::new(),
            main: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Chains executed once per host before the main phase.
    pub fn with_before(mut self, chains: Vec<Chain>) -> Self {
        self.before = chains;
        self
    }

    /// The per-schema migration chains.
    pub fn with_main(mut self, chains: Vec<Chain>) -> Self {
        self.main = chains;
        self
    }

    /// Chains executed once per host after the main phase.
    pub fn with_after(mut self, chains: Vec<Chain>) -> Self {
        self.after = chains;
        self
    }

    pub async fn run(mut self) -> GridOutcome {
        let multi = self.show_progress.then(MultiProgress::new);
        let mut outcome = GridOutcome::default();

        let before = std::mem::take(&mut self.before);
        let main = std::mem::take(&mut self.main);
        let after = std::mem::take(&mut self.after);

        for worker in self.run_isolated(&multi, before).await {
            outcome.absorb(worker);
        }
        if !outcome.ok() {
            // A failing before.sql leaves hosts unprepared; nothing else may
            // run, not even the after hooks.
            return outcome;
        }

        outcome.total = main.iter().map(|c| c.migrations.len()).sum();
        let mut by_host: BTreeMap<String, VecDeque<Chain>> = BTreeMap::new();
        for chain in main {
            by_host
                .entry(chain.dest.host.clone())
                .or_default()
                .push_back(chain);
        }

        let mut set = JoinSet::new();
        for (_host, chains) in by_host {
            let workers = chains.len().min(self.workers_per_host);
            let queue = Arc::new(Mutex::new(chains));
            for _ in 0..workers {
                set.spawn(
                    Worker::new(
                        Arc::clone(&self.runner),
                        Arc::clone(&self.locks),
                        Arc::clone(&queue),
                        self.make_bar(&multi),
                    )
                    .run(),
                );
            }
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker) => outcome.absorb(worker),
                Err(e) => log::warn!("Worker task join error: {e}"),
            }
        }

        // The after hooks run regardless of main-phase errors (cleanup), and
        // their failure fails the run.
        for worker in self.run_isolated(&multi, after).await {
            outcome.absorb(worker);
        }

        outcome
    }

    /// Run each chain under its own dedicated worker, concurrently.
    async fn run_isolated(
        &self,
        multi: &Option<MultiProgress>,
        chains: Vec<Chain>,
    ) -> Vec<WorkerOutcome> {
        let mut set = JoinSet::new();
        for chain in chains {
            let queue = Arc::new(Mutex::new(VecDeque::from([chain])));
            set.spawn(
                Worker::new(
                    Arc::clone(&self.runner),
                    Arc::clone(&self.locks),
                    queue,
                    self.make_bar(multi),
                )
                .run(),
            );
        }
        let mut outcomes = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker) => outcomes.push(worker),
                Err(e) => log::warn!("Worker task join error: {e}"),
            }
        }
        outcomes
    }

    fn make_bar(&self, multi: &Option<MultiProgress>) -> Option<ProgressBar> {
        multi.as_ref().map(|m| {
            let pb = m.add(ProgressBar::new_spinner());
            pb.enable_steady_tick(TICK);
            pb
        })
    }
}

#[cfg(test)]
#[path = "grid_test.rs"]
mod tests;
