//! finsync CLI - Resolve offline-sync conflicts from the command line
//!
//! Feeds conflict files through the resolution engine and keeps conflicts,
//! learned patterns and strategy coverage in a local store.

mod cli;
mod commands;
mod error;

use std::time::Duration;

use clap::Parser;
use finsync_core::BulkResolutionOptions;

use crate::cli::{Cli, Commands, ConflictCommands, StrategyCommands};
use crate::commands::auto::run_auto;
use crate::commands::bulk::{run_bulk, BulkArgs};
use crate::commands::common::{resolve_config_path, resolve_db_path, Session};
use crate::commands::completions::run_completions;
use crate::commands::conflicts::{
    run_conflicts_durable, run_conflicts_list, run_conflicts_purge, run_conflicts_stats,
};
use crate::commands::decide::run_decide;
use crate::commands::resolve::run_resolve;
use crate::commands::scenarios::run_scenarios;
use crate::commands::strategies::{run_strategies_list, run_strategies_load};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "finsync=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let db_path = resolve_db_path(cli.db_path);
    let config_path = resolve_config_path(cli.config);
    let session = Session::open(&db_path, config_path.as_deref())?;

    match cli.command {
        Commands::Resolve {
            file,
            strategy,
            by,
            json,
        } => run_resolve(&file, &strategy, by, json, &session)?,
        Commands::Decide {
            id,
            choose,
            data,
            json,
        } => run_decide(&id, choose, data.as_deref(), json, &session)?,
        Commands::Bulk {
            file,
            strategy,
            conflict_type,
            max,
            similar,
            confirm,
            yes,
            concurrency,
            timeout_ms,
            json,
        } => {
            let args = BulkArgs {
                file,
                options: BulkResolutionOptions {
                    strategy,
                    apply_to_similar: similar,
                    conflict_type,
                    max_count: max,
                    require_confirmation: confirm,
                },
                yes,
                concurrency,
                timeout: Duration::from_millis(timeout_ms),
                json,
            };
            run_bulk(args, &session).await?;
        }
        Commands::Auto { file, json } => run_auto(file.as_deref(), json, &session)?,
        Commands::Scenarios { strategy, json } => {
            run_scenarios(strategy.as_deref(), json, &session)?;
        }
        Commands::Strategies { command } => match command {
            StrategyCommands::List { json } => run_strategies_list(json, &session)?,
            StrategyCommands::Load { file } => run_strategies_load(&file, &session)?,
        },
        Commands::Conflicts { command } => match command {
            ConflictCommands::List {
                unresolved,
                limit,
                json,
            } => run_conflicts_list(unresolved, limit, json, &session)?,
            ConflictCommands::Purge { days } => run_conflicts_purge(days, &session)?,
            ConflictCommands::Stats { json } => run_conflicts_stats(json, &session)?,
            ConflictCommands::Durable { id, index } => {
                run_conflicts_durable(&id, index, &session)?;
            }
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests;
