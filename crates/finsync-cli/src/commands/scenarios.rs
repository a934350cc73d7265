use finsync_core::db::{SqliteStrategyRepository, StrategyRepository};
use finsync_core::harness::ScenarioResult;
use finsync_core::{ScenarioHarness, ScenarioReport};

use crate::commands::common::{print_json, Session};
use crate::error::CliError;

pub fn format_scenario_line(result: &ScenarioResult) -> String {
    let status = if result.passed { "PASS" } else { "FAIL" };
    let mut line = format!(
        "{status}  {:<16}  {:<24}  {:>6}us  {:>5}B",
        result.strategy_id, result.scenario_id, result.duration_micros, result.memory_bytes
    );
    if let Some(message) = &result.message {
        line.push_str("  ");
        line.push_str(message);
    }
    line
}

pub fn format_report_summary(report: &ScenarioReport) -> String {
    format!(
        "{}/{} passed ({:.1}%)",
        report.passed_tests,
        report.total_tests,
        report.overall_pass_rate * 100.0
    )
}

pub fn run_scenarios(strategy: Option<&str>, as_json: bool, session: &Session) -> Result<(), CliError> {
    let report = ScenarioHarness::with_defaults().run(&session.engine, strategy)?;

    // Coverage is only kept for stored strategies
    let repo = SqliteStrategyRepository::new(session.db.connection());
    let mut exercised: Vec<&str> = report
        .per_scenario
        .iter()
        .map(|result| result.strategy_id.as_str())
        .collect();
    exercised.dedup();
    for id in exercised {
        repo.save_coverage(id, &session.engine.strategy(id)?.coverage)?;
    }

    if as_json {
        print_json(&report)?;
    } else {
        for result in &report.per_scenario {
            println!("{}", format_scenario_line(result));
        }
        println!("{}", format_report_summary(&report));
    }

    if report.failed_tests > 0 {
        return Err(CliError::ScenariosFailed(report.failed_tests));
    }
    Ok(())
}
