use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use finsync_core::{
    bulk_resolve, bulk_resolve_concurrent, BulkResolutionOptions, BulkResolutionResult,
    ConcurrencyLimits,
};

use crate::commands::common::{confirm, print_json, Session};
use crate::error::CliError;

pub struct BulkArgs {
    pub file: Option<PathBuf>,
    pub options: BulkResolutionOptions,
    pub yes: bool,
    pub concurrency: Option<usize>,
    pub timeout: Duration,
    pub json: bool,
}

pub fn format_bulk_summary(result: &BulkResolutionResult) -> Vec<String> {
    let mut lines = vec![format!(
        "resolved={} failed={} skipped={}",
        result.resolved, result.failed, result.skipped
    )];
    lines.extend(result.errors.iter().map(|error| {
        format!(
            "  {}  {}",
            error.conflict_id.chars().take(13).collect::<String>(),
            error.message
        )
    }));
    lines
}

pub async fn run_bulk(args: BulkArgs, session: &Session) -> Result<(), CliError> {
    let mut conflicts = session.load_conflicts(args.file.as_deref())?;
    if conflicts.is_empty() {
        println!("No conflicts to resolve.");
        return Ok(());
    }

    if args.options.require_confirmation && !args.yes {
        let prompt = format!(
            "Resolve up to {} conflict(s) with {}?",
            conflicts.len(),
            args.options.strategy
        );
        if !confirm(&prompt)? {
            return Err(CliError::Aborted);
        }
    }

    let result = match args.concurrency {
        Some(max_parallel) => {
            let limits = ConcurrencyLimits {
                max_parallel,
                item_timeout: args.timeout,
            };
            let (resolved, result) =
                bulk_resolve_concurrent(Arc::clone(&session.engine), conflicts, args.options, limits)
                    .await;
            conflicts = resolved;
            result
        }
        None => bulk_resolve(&session.engine, &mut conflicts, &args.options),
    };
    session.persist(&conflicts)?;

    if args.json {
        print_json(&result)
    } else {
        for line in format_bulk_summary(&result) {
            println!("{line}");
        }
        Ok(())
    }
}
