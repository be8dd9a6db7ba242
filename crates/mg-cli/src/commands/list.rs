//! List on-disk versions or print the code digest.

use anyhow::Result;

use crate::cli::{GlobalArgs, ListArgs};
use crate::commands::common;

/// Execute the list command
pub(crate) fn execute(args: &ListArgs, global: &GlobalArgs) -> Result<()> {
    let registry = common::load_registry(global)?;
    if args.digest {
        println!("{}", registry.digest());
        return Ok(());
    }
    for version in registry.versions() {
        println!("{version}");
    }
    Ok(())
}
