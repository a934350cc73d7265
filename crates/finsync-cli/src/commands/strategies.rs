use std::path::Path;

use finsync_core::db::{SqliteStrategyRepository, StrategyRepository};
use finsync_core::models::{ResolutionStrategy, StrategyDefinition};
use serde::Serialize;

use crate::commands::common::{format_timestamp, print_json, read_json_items, Session};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StrategyListItem {
    pub id: String,
    pub name: String,
    pub entity_types: Vec<String>,
    pub rules: usize,
    pub scenarios_covered: usize,
    pub pass_rate: f64,
    pub last_run: Option<i64>,
    pub resolutions: u64,
    pub average_micros: f64,
}

pub fn strategy_to_list_item(strategy: &ResolutionStrategy) -> StrategyListItem {
    StrategyListItem {
        id: strategy.id.clone(),
        name: strategy.name.clone(),
        entity_types: strategy.entity_types.clone(),
        rules: strategy.rules().len(),
        scenarios_covered: strategy.coverage.scenarios_covered,
        pass_rate: strategy.coverage.pass_rate,
        last_run: strategy.coverage.last_run,
        resolutions: strategy.performance.resolutions,
        average_micros: strategy.performance.average_micros(),
    }
}

pub fn format_strategy_line(item: &StrategyListItem) -> String {
    let scope = if item.entity_types.is_empty() {
        "*".to_string()
    } else {
        item.entity_types.join(",")
    };
    let coverage = item.last_run.map_or_else(
        || "never tested".to_string(),
        |last_run| {
            format!(
                "{} scenario(s), {:.0}% pass, {}",
                item.scenarios_covered,
                item.pass_rate * 100.0,
                format_timestamp(last_run)
            )
        },
    );
    format!(
        "{:<18}  {} rule(s)  [{scope}]  {coverage}",
        item.id, item.rules
    )
}

pub fn run_strategies_list(as_json: bool, session: &Session) -> Result<(), CliError> {
    let items = session
        .engine
        .strategies()
        .iter()
        .map(strategy_to_list_item)
        .collect::<Vec<_>>();

    if as_json {
        return print_json(&items);
    }
    for item in &items {
        println!("{}", format_strategy_line(item));
    }
    Ok(())
}

pub fn run_strategies_load(file: &Path, session: &Session) -> Result<(), CliError> {
    let definitions = read_json_items::<StrategyDefinition>(file)?;
    SqliteStrategyRepository::new(session.db.connection()).replace_all(&definitions)?;
    println!("Stored {} strategy definition(s)", definitions.len());
    Ok(())
}
