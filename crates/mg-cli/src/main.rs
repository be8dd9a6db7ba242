//! Migrid CLI - ordered schema migrations for a microshard fleet

use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{ApplyArgs, Cli, Commands, GlobalArgs};
use commands::common::ExitCode;
use commands::{apply, chain, list, make};

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    // Bare `mg` applies pending migrations, mirroring the common invocation
    // from deploy scripts.
    let command = cli
        .command
        .unwrap_or_else(|| Commands::Apply(ApplyArgs::default()));

    if let Err(e) = run(&command, &cli.global).await {
        // Run failures were already rendered; everything else is printed
        // here before exiting non-zero.
        match e.downcast_ref::<ExitCode>() {
            Some(code) => std::process::exit(code.0),
            None => {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn run(command: &Commands, global: &GlobalArgs) -> Result<()> {
    match command {
        Commands::Apply(args) => apply::execute(args, global).await,
        Commands::Undo(args) => apply::execute_undo(args, global).await,
        Commands::Make(args) => make::execute(args, global),
        Commands::List(args) => list::execute(args, global),
        Commands::Chain(args) => chain::execute(args, global),
    }
}
