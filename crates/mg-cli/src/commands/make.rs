//! Scaffold a new up/dn migration pair.

use anyhow::{bail, Context, Result};
use chrono::Utc;

use crate::cli::{GlobalArgs, MakeArgs};

const UP_TEMPLATE: &str = "-- Forward migration. Optional directives:\n\
    --   $delay=<ms after success>\n\
    --   $parallelism_global=<max concurrent fleet-wide>\n\
    --   $parallelism_per_host=<max concurrent per host>\n\
    --   $run_alone=1\n\n";

const DN_TEMPLATE: &str = "-- Undo of the paired up migration.\n\n";

/// Execute the make command
pub(crate) fn execute(args: &MakeArgs, global: &GlobalArgs) -> Result<()> {
    let Some((name, prefix)) = args.spec.split_once('@') else {
        bail!("Expected <name>@<prefix>, e.g. add-users@sh");
    };
    if name.is_empty() || prefix.is_empty() || name.contains('.') || prefix.contains('.') {
        bail!("Migration name and prefix must be non-empty and dot-free");
    }

    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let base = format!("{timestamp}.{name}.{prefix}");

    for suffix in ["up", "dn"] {
        let path = global.migdir.join(format!("{base}.{suffix}.sql"));
        if path.exists() {
            bail!("{} already exists", path.display());
        }
        let template = if suffix == "up" { UP_TEMPLATE } else { DN_TEMPLATE };
        std::fs::write(&path, template)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Created {}", path.display());
    }
    Ok(())
}
