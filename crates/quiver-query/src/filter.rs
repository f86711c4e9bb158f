//! WHERE/PROJECT evaluation over edge payloads
//!
//! The query language compiles edge WHERE clauses into this small
//! expression tree; the matcher evaluates it against each candidate edge
//! payload. Comparisons on a missing field never match.

use quiver_core::traverse;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Right-hand side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Literal(Value),
    /// Named query parameter, resolved at evaluation time
    Parameter(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    Comparison {
        path: String,
        op: ComparisonOp,
        value: FilterValue,
    },
    And(Box<FilterExpression>, Box<FilterExpression>),
    Or(Box<FilterExpression>, Box<FilterExpression>),
    Not(Box<FilterExpression>),
}

impl FilterExpression {
    pub fn eq<P: Into<String>>(path: P, value: Value) -> Self {
        FilterExpression::Comparison {
            path: path.into(),
            op: ComparisonOp::Eq,
            value: FilterValue::Literal(value),
        }
    }

    pub fn compare<P: Into<String>>(path: P, op: ComparisonOp, value: FilterValue) -> Self {
        FilterExpression::Comparison {
            path: path.into(),
            op,
            value,
        }
    }

    /// Evaluate against one payload object
    pub fn matches(&self, payload: &Value, parameters: &Map<String, Value>) -> bool {
        match self {
            FilterExpression::Comparison { path, op, value } => {
                let Some(actual) = traverse(payload, path) else {
                    return false;
                };
                let expected = match value {
                    FilterValue::Literal(v) => v.clone(),
                    FilterValue::Parameter(name) => match parameters.get(name) {
                        Some(v) => v.clone(),
                        None => return false,
                    },
                };
                compare(&actual, *op, &expected)
            }
            FilterExpression::And(left, right) => {
                left.matches(payload, parameters) && right.matches(payload, parameters)
            }
            FilterExpression::Or(left, right) => {
                left.matches(payload, parameters) || right.matches(payload, parameters)
            }
            FilterExpression::Not(inner) => !inner.matches(payload, parameters),
        }
    }
}

fn compare(actual: &Value, op: ComparisonOp, expected: &Value) -> bool {
    match op {
        ComparisonOp::Eq => actual == expected,
        ComparisonOp::Ne => actual != expected,
        _ => {
            if let (Some(a), Some(b)) = (actual.as_f64(), expected.as_f64()) {
                return numeric_compare(a, op, b);
            }
            if let (Some(a), Some(b)) = (actual.as_str(), expected.as_str()) {
                return match op {
                    ComparisonOp::Gt => a > b,
                    ComparisonOp::Gte => a >= b,
                    ComparisonOp::Lt => a < b,
                    ComparisonOp::Lte => a <= b,
                    _ => unreachable!(),
                };
            }
            false
        }
    }
}

fn numeric_compare(a: f64, op: ComparisonOp, b: f64) -> bool {
    match op {
        ComparisonOp::Gt => a > b,
        ComparisonOp::Gte => a >= b,
        ComparisonOp::Lt => a < b,
        ComparisonOp::Lte => a <= b,
        _ => unreachable!(),
    }
}
