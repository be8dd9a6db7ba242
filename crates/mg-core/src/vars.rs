//! Migration file directives.
//!
//! A migration file may carry `-- $name=value` lines that tune how the engine
//! schedules it. Unknown directive names are load errors so that a typo never
//! silently runs a heavyweight migration at full parallelism.

use crate::error::{CoreError, CoreResult};
use regex::Regex;
use std::sync::OnceLock;

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^--\s*(\$\w+)\s*=([^\r\n]+)\r?$").expect("valid regex literal")
    })
}

/// Scheduling directives parsed from a migration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationVars {
    /// Milliseconds to sleep after the script succeeds (`$delay`).
    pub delay_ms: u64,

    /// Max concurrent instances of this version across the fleet
    /// (`$parallelism_global`); `None` means unlimited.
    pub parallelism_global: Option<usize>,

    /// Max concurrent instances of this version per host
    /// (`$parallelism_per_host`); `None` means unlimited.
    pub parallelism_per_host: Option<usize>,

    /// While this migration runs, nothing else may run anywhere
    /// (`$run_alone`).
    pub run_alone: bool,
}

impl MigrationVars {
    /// Extract directives from a file body.
    pub fn parse(file_name: &str, body: &str) -> CoreResult<Self> {
        let mut vars = Self::default();
        for cap in directive_re().captures_iter(body) {
            let name = cap[1].to_string();
            let value = cap[2].trim().to_string();
            let parsed: u64 =
                value
                    .parse()
                    .map_err(|_| CoreError::BadDirectiveValue {
                        file: file_name.to_string(),
                        name: name.clone(),
                        value: value.clone(),
                    })?;
            match name.as_str() {
                "$delay" => vars.delay_ms = parsed,
                "$parallelism_global" => vars.parallelism_global = Some(parsed as usize),
                "$parallelism_per_host" => vars.parallelism_per_host = Some(parsed as usize),
                "$run_alone" => vars.run_alone = parsed != 0,
                _ => {
                    return Err(CoreError::UnknownDirective {
                        file: file_name.to_string(),
                        name,
                    })
                }
            }
        }
        Ok(vars)
    }

    /// True when any of the concurrency-limiting directives is present.
    ///
    /// Files hosting `CREATE INDEX CONCURRENTLY` must set at least one of
    /// them, otherwise an unbounded fleet of concurrent index builds could
    /// saturate every host at once.
    pub fn any_concurrency_limit(&self) -> bool {
        self.parallelism_global.is_some() || self.parallelism_per_host.is_some() || self.run_alone
    }
}

#[cfg(test)]
#[path = "vars_test.rs"]
mod tests;
