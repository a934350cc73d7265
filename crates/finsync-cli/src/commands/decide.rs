use std::path::Path;

use finsync_core::{Decision, RecordSnapshot};
use serde_json::Value;

use crate::cli::Choice;
use crate::commands::common::Session;
use crate::commands::resolve::{print_items, resolve_item};
use crate::error::CliError;

pub fn decision_for(choice: Choice, data: Option<Value>) -> Result<Decision, CliError> {
    match (choice, data) {
        (Choice::Merge, Some(data)) => Ok(Decision::Custom(RecordSnapshot::from_value(data)?)),
        (_, Some(_)) => Err(CliError::DataRequiresMerge),
        (Choice::Client, None) => Ok(Decision::Client),
        (Choice::Server, None) => Ok(Decision::Server),
        (Choice::Merge, None) => Ok(Decision::Merge),
    }
}

pub fn run_decide(
    id: &str,
    choice: Choice,
    data_path: Option<&Path>,
    as_json: bool,
    session: &Session,
) -> Result<(), CliError> {
    let data = data_path
        .map(|path| -> Result<Value, CliError> {
            Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
        })
        .transpose()?;
    let decision = decision_for(choice, data)?;

    let mut conflict = session.find_conflict(id)?;
    let result = session.engine.resolve_with_decision(&mut conflict, decision);
    let item = resolve_item(&conflict, &result);
    result?;
    session.persist(std::slice::from_ref(&conflict))?;

    print_items(&[item], as_json)
}
