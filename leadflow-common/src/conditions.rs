//! Evaluation of rule conditions against a lead's attribute snapshot.
//!
//! Evaluation fails closed. An unsupported operator, a missing field or an
//! uncomparable value never satisfies a condition, so a half-migrated rule
//! can disable itself but can never misroute a lead. The one deliberate
//! exception is `is_not_set`, whose whole point is to match absent fields.

use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::ParseOperatorError;
use crate::types::RuleCondition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Contains,
    NotContains,
    Gt,
    Gte,
    Lt,
    Lte,
    IsSet,
    IsNotSet,
    AnyOf,
}

impl FromStr for Operator {
    type Err = ParseOperatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(Operator::Eq),
            "neq" => Ok(Operator::Neq),
            "contains" => Ok(Operator::Contains),
            "not_contains" => Ok(Operator::NotContains),
            "gt" => Ok(Operator::Gt),
            "gte" => Ok(Operator::Gte),
            "lt" => Ok(Operator::Lt),
            "lte" => Ok(Operator::Lte),
            "is_set" => Ok(Operator::IsSet),
            "is_not_set" => Ok(Operator::IsNotSet),
            "any_of" => Ok(Operator::AnyOf),
            invalid => Err(ParseOperatorError(invalid.to_owned())),
        }
    }
}

/// Whether one stored condition holds for the given attribute snapshot.
pub fn condition_passes(condition: &RuleCondition, fields: &Map<String, Value>) -> bool {
    let Ok(operator) = Operator::from_str(&condition.operator) else {
        tracing::warn!(
            operator = condition.operator,
            condition_id = condition.id,
            "skipping condition with unsupported operator"
        );
        return false;
    };
    evaluate(operator, &condition.field, &condition.value, fields)
}

pub fn evaluate(
    operator: Operator,
    field: &str,
    expected: &Value,
    fields: &Map<String, Value>,
) -> bool {
    // An explicit JSON null is indistinguishable from a missing key.
    let actual = fields.get(field).filter(|value| !value.is_null());

    match operator {
        Operator::IsSet => actual.is_some(),
        Operator::IsNotSet => actual.is_none(),
        Operator::Eq => actual.is_some_and(|actual| values_equal(expected, actual)),
        Operator::Neq => actual.is_some_and(|actual| !values_equal(expected, actual)),
        Operator::Contains => actual.is_some_and(|actual| contains(actual, expected)),
        Operator::NotContains => actual.is_some_and(|actual| !contains(actual, expected)),
        Operator::Gt => actual.is_some_and(|actual| compare_numeric(actual, expected, |a, e| a > e)),
        Operator::Gte => {
            actual.is_some_and(|actual| compare_numeric(actual, expected, |a, e| a >= e))
        }
        Operator::Lt => actual.is_some_and(|actual| compare_numeric(actual, expected, |a, e| a < e)),
        Operator::Lte => {
            actual.is_some_and(|actual| compare_numeric(actual, expected, |a, e| a <= e))
        }
        Operator::AnyOf => actual.is_some_and(|actual| match expected {
            Value::Array(options) => options.iter().any(|option| scalar_eq(option, actual)),
            _ => false,
        }),
    }
}

/// Equality over string representations. An array on the condition side is
/// treated as membership, which is how multi-select pickers store values.
fn values_equal(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Array(options) => options.iter().any(|option| scalar_eq(option, actual)),
        _ => scalar_eq(expected, actual),
    }
}

fn scalar_eq(expected: &Value, actual: &Value) -> bool {
    to_string_representation(expected).to_lowercase()
        == to_string_representation(actual).to_lowercase()
}

fn contains(actual: &Value, expected: &Value) -> bool {
    to_string_representation(actual)
        .to_lowercase()
        .contains(&to_string_representation(expected).to_lowercase())
}

fn compare_numeric(actual: &Value, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (to_f64_representation(actual), to_f64_representation(expected)) {
        (Some(actual), Some(expected)) => cmp(actual, expected),
        _ => false,
    }
}

/// Strings compare by their contents, everything else by its JSON encoding.
/// This keeps `true == "true"` and `23 == "23"` without inventing a type
/// coercion table.
pub fn to_string_representation(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

pub fn to_f64_representation(value: &Value) -> Option<f64> {
    if value.is_number() {
        value.as_f64()
    } else {
        to_string_representation(value).parse::<f64>().ok()
    }
}
