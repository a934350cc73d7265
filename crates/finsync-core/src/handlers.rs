//! Custom rule handlers.
//!
//! Each handler takes the same read-only rule context as the built-in actions
//! and produces a [`RuleOutcome`], delegating to the built-in client, server
//! and merge outcomes where it can.

use serde_json::{Number, Value};

use crate::config::BusinessRules;
use crate::error::{Error, Result};
use crate::merge::merge_record;
use crate::models::{CustomHandler, RecordSnapshot, Resolution, ResolutionAction, Side};
use crate::rules::{
    smart_merge, take_side, RuleContext, RuleOutcome, AWAITING_INPUT_NOTE, FALLBACK_CONFIDENCE,
    MERGE_CONFIDENCE, RULE_CONFIDENCE,
};

/// Record key that carries integrity repair notes
pub const REPAIR_NOTES_FIELD: &str = "_repairNotes";

pub fn run(handler: CustomHandler, ctx: &RuleContext<'_>) -> Result<RuleOutcome> {
    match handler {
        CustomHandler::BusinessRuleValidation => business_rule_validation(ctx),
        CustomHandler::IntegrityRepair => Ok(integrity_repair(ctx)),
        CustomHandler::ComplianceCheck => compliance_check(ctx),
        CustomHandler::UserPattern => Ok(user_pattern(ctx)),
    }
}

/// Business-rule violations of one snapshot, empty when it is valid
pub fn violations(record: &RecordSnapshot, rules: &BusinessRules) -> Result<Vec<String>> {
    let mut found = Vec::new();

    for field in &rules.required_fields {
        if record.get(field).map_or(true, Value::is_null) {
            found.push(format!("{field} is required"));
        }
    }

    for field in &rules.non_negative_fields {
        match record.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::Number(number)) => {
                if number.as_f64().is_some_and(|value| value < 0.0) {
                    found.push(format!("{field} must not be negative"));
                }
            }
            Some(_) => found.push(format!("{field} must be a number")),
        }
    }

    if !rules.currency_field.is_empty() {
        if let Some(value) = record.get(&rules.currency_field) {
            let valid = match value.as_str() {
                Some(code) => rules.is_valid_currency(code)?,
                None => false,
            };
            if !valid {
                found.push(format!(
                    "{} must match {}",
                    rules.currency_field, rules.currency_pattern
                ));
            }
        }
    }

    Ok(found)
}

fn business_rule_validation(ctx: &RuleContext<'_>) -> Result<RuleOutcome> {
    let rules = &ctx.config.business_rules;
    let client = violations(ctx.client(), rules)?;
    let server = violations(ctx.server(), rules)?;

    Ok(match (client.is_empty(), server.is_empty()) {
        (true, true) => smart_merge(ctx, MERGE_CONFIDENCE),
        (true, false) => take_side(
            ctx,
            Side::Client,
            RULE_CONFIDENCE,
            format!("server violates business rules ({})", server.join(", ")),
        ),
        (false, true) => take_side(
            ctx,
            Side::Server,
            RULE_CONFIDENCE,
            format!("client violates business rules ({})", client.join(", ")),
        ),
        (false, false) => RuleOutcome::RequiresInput {
            note: format!(
                "both sides violate business rules (client: {}; server: {}); {AWAITING_INPUT_NOTE}",
                client.join(", "),
                server.join(", ")
            ),
        },
    })
}

fn integrity_repair(ctx: &RuleContext<'_>) -> RuleOutcome {
    let merged = merge_record(ctx.client(), ctx.server(), ctx.diffs, ctx.config);
    let mut notes = merged.notes;
    let mut record = merged.record.into_fields();

    for field in &ctx.config.business_rules.required_fields {
        if record.get(field).is_some_and(|value| !value.is_null()) {
            continue;
        }
        let donor = [Side::Client, Side::Server].into_iter().find_map(|side| {
            ctx.snapshot(side)
                .get(field)
                .filter(|value| !value.is_null())
                .map(|value| (side, value.clone()))
        });
        if let Some((side, value)) = donor {
            notes.push(format!("{field}: filled from {}", side.as_str()));
            record.insert(field.clone(), value);
        }
    }

    for field in &ctx.config.monetary_fields {
        if let Some(number) = record.get(field).and_then(numeric_string) {
            notes.push(format!("{field}: coerced numeric string"));
            record.insert(field.clone(), Value::Number(number));
        }
    }

    if !notes.is_empty() {
        tracing::warn!(conflict_id = %ctx.conflict.id, repairs = notes.len(), "Repaired merged record");
        record.insert(
            REPAIR_NOTES_FIELD.to_string(),
            Value::Array(notes.iter().cloned().map(Value::String).collect()),
        );
    }

    let note = if notes.is_empty() {
        "integrity check passed".to_string()
    } else {
        format!("integrity repair ({})", notes.join("; "))
    };
    RuleOutcome::Resolved {
        data: RecordSnapshot::new(record),
        action: ResolutionAction::Merge,
        confidence: MERGE_CONFIDENCE,
        note,
    }
}

fn numeric_string(value: &Value) -> Option<Number> {
    let text = value.as_str()?.trim();
    if let Ok(integer) = text.parse::<i64>() {
        return Some(Number::from(integer));
    }
    text.parse::<f64>()
        .ok()
        .filter(|float| float.is_finite())
        .and_then(Number::from_f64)
}

fn compliance_check(ctx: &RuleContext<'_>) -> Result<RuleOutcome> {
    let rules = &ctx.config.business_rules;
    let client = violations(ctx.client(), rules)?;
    let server = violations(ctx.server(), rules)?;

    match (client.is_empty(), server.is_empty()) {
        (false, false) => Err(Error::ComplianceViolation {
            conflict_id: ctx.conflict.id.to_string(),
            violations: format!("client: {}; server: {}", client.join(", "), server.join(", ")),
        }),
        (true, false) => Ok(take_side(
            ctx,
            Side::Client,
            RULE_CONFIDENCE,
            format!("server fails compliance ({})", server.join(", ")),
        )),
        (false, true) => Ok(take_side(
            ctx,
            Side::Server,
            RULE_CONFIDENCE,
            format!("client fails compliance ({})", client.join(", ")),
        )),
        (true, true) => {
            let side = ctx.newer_or_default();
            Ok(take_side(
                ctx,
                side,
                RULE_CONFIDENCE,
                format!("both compliant, newer {} record kept", side.as_str()),
            ))
        }
    }
}

fn user_pattern(ctx: &RuleContext<'_>) -> RuleOutcome {
    let threshold = ctx.config.patterns.shortcut_threshold;
    if let Some(pattern) = ctx.pattern.filter(|pattern| pattern.confidence > threshold) {
        let note = format!(
            "learned preference {} (confidence {:.2}, seen {} times)",
            pattern.preferred_resolution.as_str(),
            pattern.confidence,
            pattern.frequency
        );
        return match pattern.preferred_resolution {
            Resolution::Client => take_side(ctx, Side::Client, pattern.confidence, note),
            Resolution::Server => take_side(ctx, Side::Server, pattern.confidence, note),
            Resolution::Merge => match smart_merge(ctx, pattern.confidence) {
                RuleOutcome::Resolved {
                    data,
                    action,
                    confidence,
                    note: merge_note,
                } => RuleOutcome::Resolved {
                    data,
                    action,
                    confidence,
                    note: format!("{note}: {merge_note}"),
                },
                other => other,
            },
        };
    }

    let side = ctx.newer_or_default();
    take_side(
        ctx,
        side,
        FALLBACK_CONFIDENCE,
        format!("no confident pattern, newer {} record kept", side.as_str()),
    )
}
