//! SQL runner trait definition

use crate::dest::Dest;
use crate::error::DbResult;
use async_trait::async_trait;

/// Callback receiving script output lines as they stream in.
pub type OnLine<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Outcome of one script execution.
#[derive(Debug, Clone, Default)]
pub struct ExitResult {
    /// Client exit code; 0 means every statement succeeded.
    pub code: i32,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,

    /// True when stderr contained a `WARNING:` marker.
    pub warning: bool,
}

impl ExitResult {
    /// True when the script ran to completion.
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// The most useful tail of output for an error report: stderr if any,
    /// else the last stdout lines.
    pub fn failure_output(&self) -> String {
        if !self.stderr.trim().is_empty() {
            self.stderr.trim_end().to_string()
        } else {
            self.stdout.trim_end().to_string()
        }
    }
}

/// SQL execution abstraction for Migrid
///
/// Implementations must be Send + Sync for concurrent workers. The engine
/// never talks to a database driver directly; everything flows through a
/// runner so tests can substitute an in-memory fake.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    /// Execute a multi-statement script against `dest`, streaming each
    /// non-empty output line to `on_line`.
    async fn run_script(
        &self,
        dest: &Dest,
        script: &str,
        on_line: OnLine<'_>,
    ) -> DbResult<ExitResult>;

    /// Execute a single query and return its rows as fields of text.
    /// A non-zero client exit is an error carrying the captured stderr.
    async fn run_query(&self, dest: &Dest, sql: &str) -> DbResult<Vec<Vec<String>>>;
}
