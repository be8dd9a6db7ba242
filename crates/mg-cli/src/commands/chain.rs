//! Write the append-only chain anchor file.
//!
//! The file lists every version linked to its predecessor. Its only job is
//! to make two branches that each add a version collide in version control:
//! both edits land on the same final line, guaranteeing a merge conflict a
//! human has to look at instead of a silently reordered timeline.

use anyhow::{Context, Result};

use crate::cli::{ChainArgs, GlobalArgs};
use crate::commands::common;

const WARN: &str = "# append-only; a merge conflict here means versions were added in parallel";

/// Execute the chain command
pub(crate) fn execute(args: &ChainArgs, global: &GlobalArgs) -> Result<()> {
    let registry = common::load_registry(global)?;
    let out = args
        .out
        .clone()
        .unwrap_or_else(|| global.migdir.join("versions.chain"));

    let mut content = format!("{}\n", registry.digest_short());
    let mut prev = "0".to_string();
    for version in registry.versions() {
        content.push_str(&format!("{prev} -> {version}  {WARN}\n"));
        prev = version;
    }

    std::fs::write(&out, &content)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    println!(
        "Wrote {} ({} versions)",
        out.display(),
        registry.versions().len()
    );
    Ok(())
}
