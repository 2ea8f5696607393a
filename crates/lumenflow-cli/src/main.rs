//! `lumen` — a command-line front end over the LumenFlow WU lifecycle
//! engine. Each subcommand maps onto one of spec.md §6's caller-visible
//! operations, plus the `scan`/`repair-duplicate-ids` recovery extras and
//! a pair of read-only `backlog`/`doctor` diagnostics.

mod commands;
mod exit;
mod repo_ctx;

use clap::Parser;
use commands::Commands;

/// Coordinate multiple autonomous coding agents sharing one git repository.
#[derive(Parser)]
#[command(name = "lumen", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Claim(args) => commands::claim(args),
        Commands::Done(args) => commands::done(args),
        Commands::Block(args) => commands::block(args),
        Commands::Unblock(args) => commands::unblock(args),
        Commands::Status(args) => commands::status(args),
        Commands::Checkpoint(args) => commands::checkpoint(args),
        Commands::Context(args) => commands::context(args),
        Commands::RecoverContext(args) => commands::recover_context(args),
        Commands::Scan => commands::scan(),
        Commands::Recover(args) => commands::recover(args),
        Commands::RepairDuplicateIds => commands::repair_duplicate_ids(),
        Commands::Backlog => commands::backlog(),
        Commands::Doctor => commands::doctor(),
    };

    std::process::exit(code);
}
