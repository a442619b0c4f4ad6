//! Evaluation of parsed criteria against a value store

use regex::Regex;
use serde_json::Value;
use tracing::trace;

use crate::error::{Error, Result};
use crate::model::{Comparison, Criteria, Criterion, LogicalOperator, Operator};
use crate::store::{ValueStore, value_to_string};

/// Evaluate criteria against a store
///
/// Siblings fold left to right with the level's connective. An empty
/// expression is true.
pub fn evaluate(criteria: &Criteria, store: &ValueStore) -> Result<bool> {
    fold(criteria, None, store).map(|value| value.unwrap_or(true))
}

impl Criteria {
    /// Evaluate these criteria against a store
    pub fn evaluate(&self, store: &ValueStore) -> Result<bool> {
        evaluate(self, store)
    }
}

fn fold(criteria: &Criteria, seed: Option<bool>, store: &ValueStore) -> Result<Option<bool>> {
    let connective = criteria.logical_operator.unwrap_or(LogicalOperator::And);
    let mut accumulated = seed;
    for criterion in &criteria.criteria {
        let node = match criterion {
            Criterion::Continuation(tail) => {
                trace!(seed = ?accumulated, connective = ?tail.logical_operator, "folding continuation");
                accumulated = fold(tail, accumulated, store)?;
                continue;
            }
            Criterion::Group(group) => Node::Group(group),
            Criterion::Comparison(comparison) => Node::Comparison(comparison),
        };
        accumulated = Some(match (accumulated, connective) {
            (Some(false), LogicalOperator::And) => false,
            (Some(true), LogicalOperator::Or) => true,
            _ => node.evaluate(store)?,
        });
    }
    Ok(accumulated)
}

enum Node<'a> {
    Group(&'a Criteria),
    Comparison(&'a Comparison),
}

impl Node<'_> {
    fn evaluate(&self, store: &ValueStore) -> Result<bool> {
        match self {
            Node::Group(group) => evaluate(group, store),
            Node::Comparison(comparison) => compare(comparison, store),
        }
    }
}

fn compare(comparison: &Comparison, store: &ValueStore) -> Result<bool> {
    let left = resolve(comparison.left_operand.as_deref(), store);
    let Some(operator) = comparison.operator else {
        let unresolved = comparison
            .left_operand
            .as_deref()
            .and_then(single_reference)
            .is_some_and(|path| !store.contains(path));
        return Ok(!unresolved && is_truthy(&left));
    };
    let right = comparison
        .right_operand
        .as_deref()
        .map(|right| store.expand(right))
        .unwrap_or_default();

    trace!(left = %value_to_string(&left), ?operator, %right, "comparing");
    match operator {
        Operator::Equal => Ok(equals(&left, &right)),
        Operator::NotEqual => Ok(!equals(&left, &right)),
        Operator::Matches => matches(&left, &right),
        Operator::NotMatches => matches(&left, &right).map(|matched| !matched),
        Operator::Greater | Operator::GreaterOrEqual | Operator::Less | Operator::LessOrEqual => {
            let left = number(comparison, &value_to_string(&left))?;
            let right = number(comparison, &right)?;
            Ok(match operator {
                Operator::Greater => left > right,
                Operator::GreaterOrEqual => left >= right,
                Operator::Less => left < right,
                _ => left <= right,
            })
        }
    }
}

/// Resolve an operand: a lone `$path` keeps the stored value's type, other
/// `$` forms are expanded as text, and bare words are looked up before being
/// taken literally.
fn resolve(operand: Option<&str>, store: &ValueStore) -> Value {
    let Some(operand) = operand else {
        return Value::String(String::new());
    };
    if operand.contains('$') {
        if let Some(value) = single_reference(operand).and_then(|path| store.get(path)) {
            return value.clone();
        }
        return Value::String(store.expand(operand));
    }
    store
        .get(operand)
        .cloned()
        .unwrap_or_else(|| Value::String(operand.to_string()))
}

fn single_reference(operand: &str) -> Option<&str> {
    let path = match operand.strip_prefix("${") {
        Some(rest) => rest.strip_suffix('}')?,
        None => operand.strip_prefix('$')?,
    };
    path.chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        .then_some(path)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::String(text) => {
            let text = text.trim();
            !text.is_empty() && text != "false"
        }
        _ => true,
    }
}

fn equals(left: &Value, right: &str) -> bool {
    let right = right.trim();
    match left {
        Value::Object(_) | Value::Array(_) => serde_json::from_str::<Value>(right)
            .map(|parsed| &parsed == left)
            .unwrap_or(false),
        _ => {
            let text = value_to_string(left);
            let text = text.trim();
            match (text.parse::<f64>(), right.parse::<f64>()) {
                (Ok(a), Ok(b)) => a == b,
                _ => text == right,
            }
        }
    }
}

fn matches(left: &Value, pattern: &str) -> Result<bool> {
    let pattern = pattern.trim();
    let (negated, pattern) = match pattern.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, pattern),
    };
    let text = value_to_string(left);
    let matched = if let Some(expression) = pattern
        .strip_prefix("~/")
        .and_then(|rest| rest.strip_suffix('/'))
    {
        Regex::new(expression)
            .map_err(|source| Error::InvalidRegex {
                expression: expression.to_string(),
                source,
            })?
            .is_match(&text)
    } else if pattern.len() >= 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        text.contains(&pattern[1..pattern.len() - 1])
    } else {
        equals(left, pattern)
    };
    Ok(matched != negated)
}

fn number(comparison: &Comparison, text: &str) -> Result<f64> {
    text.trim().parse::<f64>().map_err(|_| {
        Error::evaluation(comparison.to_string(), format!("'{text}' is not a number"))
    })
}
