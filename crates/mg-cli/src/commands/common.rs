//! Shared utilities for CLI commands

use anyhow::{bail, Context, Result};
use mg_core::Registry;
use mg_db::Dest;
use std::fmt;

use crate::cli::GlobalArgs;

/// Error type representing a non-zero process exit code.
///
/// Use `return Err(ExitCode(N).into())` instead of `std::process::exit(N)`
/// so that RAII destructors run and cleanup happens properly.
#[derive(Debug)]
pub struct ExitCode(pub i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Empty display — main.rs handles the exit code without printing
        write!(f, "")
    }
}

impl std::error::Error for ExitCode {}

/// Load and validate the migration directory.
pub fn load_registry(global: &GlobalArgs) -> Result<Registry> {
    Registry::load(&global.migdir)
        .with_context(|| format!("Failed to load migrations from {}", global.migdir.display()))
}

/// Parse the `--hosts` list into one Dest per physical host.
pub fn parse_hosts(global: &GlobalArgs) -> Result<Vec<Dest>> {
    let mut dests = Vec::new();
    for spec in global.hosts.split([',', ';']) {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        let (host, port) = match spec.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>()
                    .with_context(|| format!("Bad port in host spec '{spec}'"))?,
            ),
            None => (spec, global.port),
        };
        dests.push(Dest::new(host, port, &global.user, &global.pass, &global.db));
    }
    if dests.is_empty() {
        bail!("No hosts given; set --hosts or PGHOST");
    }
    Ok(dests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn global(hosts: &str) -> GlobalArgs {
        GlobalArgs {
            migdir: PathBuf::from("mig"),
            hosts: hosts.to_string(),
            port: 5432,
            user: "postgres".to_string(),
            pass: String::new(),
            db: "fleet".to_string(),
            verbose: false,
        }
    }

    #[test]
    fn test_parse_hosts_list() {
        let dests = parse_hosts(&global("db1, db2:6432;db3")).unwrap();
        assert_eq!(dests.len(), 3);
        assert_eq!(dests[0].host, "db1");
        assert_eq!(dests[0].port, 5432);
        assert_eq!(dests[1].host, "db2");
        assert_eq!(dests[1].port, 6432);
        assert_eq!(dests[2].host, "db3");
    }

    #[test]
    fn test_parse_hosts_rejects_bad_port() {
        assert!(parse_hosts(&global("db1:notaport")).is_err());
    }

    #[test]
    fn test_parse_hosts_rejects_empty() {
        assert!(parse_hosts(&global(" , ")).is_err());
    }
}
