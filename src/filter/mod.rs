//! Quality filter expressions: parsing, evaluation, validation, description.
//!
//! A filter specification is a JSON object mixing boolean operators
//! (`$and`, `$or`, `$not`) with quality leaves:
//!
//! ```json
//! {"$or": [{"mood": "open"}, {"mood": "closed"}], "focus": {"present": true}}
//! ```
//!
//! [`QualityFilterService::parse`] turns a spec into a [`FilterExpr`] tree,
//! [`evaluate`](QualityFilterService::evaluate) applies it to a record
//! (total, never panics), [`validate`](QualityFilterService::validate)
//! reports every structural problem at once, and
//! [`describe`](QualityFilterService::describe) renders a human-readable
//! reconstruction for debugging.

mod keywords;

pub use keywords::{patterns as subtype_patterns, prose_matches};

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::record::{Dimension, ExperienceRecord, NormalizedQuality};

/// Errors from filter parsing and evaluation, each with a stable
/// machine-readable code for programmatic handling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Filter specification is empty")]
    Empty,

    #[error("Invalid filter value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("No valid filters found in specification")]
    NoValidFilters,

    #[error("Unknown expression type: {0}")]
    UnknownExpression(String),

    #[error("Filter evaluation failed: {0}")]
    Evaluation(String),
}

impl FilterError {
    /// Stable status code for JSON error surfaces.
    #[must_use]
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::Empty => "EMPTY_FILTER",
            Self::InvalidValue { .. } => "INVALID_FILTER_VALUE",
            Self::NoValidFilters => "NO_VALID_FILTERS",
            Self::UnknownExpression(_) => "UNKNOWN_EXPRESSION_TYPE",
            Self::Evaluation(_) => "EVALUATION_ERROR",
        }
    }
}

/// How a `Value` leaf compares filter values against record subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    Exact,
    Contains,
}

/// A parsed filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// The quality carries some value (or none, for `present: false`).
    Presence { quality: Dimension, present: bool },
    /// The quality's value matches any of `values` (OR across the array).
    Value {
        quality: Dimension,
        values: Vec<String>,
        operator: MatchOperator,
    },
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
    Not(Box<FilterExpr>),
}

/// Result of [`QualityFilterService::validate`]: every problem found, not
/// just the first.
#[derive(Debug, Clone, Default)]
pub struct FilterValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Stateless service for quality-filter parsing and evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityFilterService;

impl QualityFilterService {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parses a filter specification into an expression tree.
    ///
    /// Unknown `$`-operators and unknown quality names are skipped here
    /// (use [`validate`](Self::validate) for actionable feedback); if
    /// nothing recognizable remains the result is
    /// [`FilterError::NoValidFilters`].
    pub fn parse(&self, spec: &JsonValue) -> Result<FilterExpr, FilterError> {
        let Some(object) = spec.as_object() else {
            if spec.is_null() {
                return Err(FilterError::Empty);
            }
            return Err(FilterError::InvalidValue {
                key: "$root".to_string(),
                reason: "filter specification must be an object".to_string(),
            });
        };
        if object.is_empty() {
            return Err(FilterError::Empty);
        }

        let mut children = Vec::new();
        for (key, value) in object {
            match key.as_str() {
                "$and" | "$or" => {
                    let Some(items) = value.as_array() else {
                        return Err(FilterError::InvalidValue {
                            key: key.clone(),
                            reason: "operator expects an array of filter objects".to_string(),
                        });
                    };
                    if items.is_empty() {
                        return Err(FilterError::InvalidValue {
                            key: key.clone(),
                            reason: "operator requires at least one child".to_string(),
                        });
                    }
                    let parsed: Result<Vec<FilterExpr>, FilterError> =
                        items.iter().map(|item| self.parse(item)).collect();
                    let parsed = parsed?;
                    children.push(if key == "$and" {
                        FilterExpr::And(parsed)
                    } else {
                        FilterExpr::Or(parsed)
                    });
                }
                "$not" => {
                    children.push(FilterExpr::Not(Box::new(self.parse(value)?)));
                }
                other if other.starts_with('$') => {
                    // Unknown operators are a validate-time error; parse
                    // only handles the three known ones.
                }
                other => match other.parse::<Dimension>() {
                    Ok(quality) => children.push(Self::parse_leaf(quality, other, value)?),
                    Err(_) => {}
                },
            }
        }

        match children.len() {
            0 => Err(FilterError::NoValidFilters),
            1 => Ok(children.remove(0)),
            _ => Ok(FilterExpr::And(children)),
        }
    }

    fn parse_leaf(
        quality: Dimension,
        key: &str,
        value: &JsonValue,
    ) -> Result<FilterExpr, FilterError> {
        match value {
            JsonValue::String(s) => Ok(FilterExpr::Value {
                quality,
                values: vec![s.clone()],
                operator: MatchOperator::Exact,
            }),
            JsonValue::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match item.as_str() {
                        Some(s) => values.push(s.to_string()),
                        None => {
                            return Err(FilterError::InvalidValue {
                                key: key.to_string(),
                                reason: "array values must all be strings".to_string(),
                            });
                        }
                    }
                }
                if values.is_empty() {
                    return Err(FilterError::InvalidValue {
                        key: key.to_string(),
                        reason: "value array must not be empty".to_string(),
                    });
                }
                Ok(FilterExpr::Value {
                    quality,
                    values,
                    operator: MatchOperator::Exact,
                })
            }
            JsonValue::Object(map) => match map.get("present") {
                Some(JsonValue::Bool(present)) => Ok(FilterExpr::Presence {
                    quality,
                    present: *present,
                }),
                Some(_) => Err(FilterError::InvalidValue {
                    key: key.to_string(),
                    reason: "'present' must be a boolean".to_string(),
                }),
                None => Err(FilterError::InvalidValue {
                    key: key.to_string(),
                    reason: "object value must contain a 'present' boolean".to_string(),
                }),
            },
            _ => Err(FilterError::InvalidValue {
                key: key.to_string(),
                reason: "expected a string, array of strings, or {present: bool}".to_string(),
            }),
        }
    }

    /// Evaluates an expression against a record.
    ///
    /// Total and deterministic over any well-formed record; boolean
    /// combinators short-circuit.
    #[must_use]
    pub fn evaluate(&self, record: &ExperienceRecord, expression: &FilterExpr) -> bool {
        let normalized = record.normalized_qualities();
        Self::evaluate_expr(&normalized, expression)
    }

    fn evaluate_expr(
        qualities: &crate::record::NormalizedQualities,
        expression: &FilterExpr,
    ) -> bool {
        match expression {
            FilterExpr::Presence { quality, present } => {
                qualities.is_present(*quality) == *present
            }
            FilterExpr::Value {
                quality,
                values,
                operator,
            } => match qualities.get(*quality) {
                Some(q) => values.iter().any(|v| Self::value_matches(*quality, q, v, *operator)),
                None => false,
            },
            FilterExpr::And(children) => {
                children.iter().all(|c| Self::evaluate_expr(qualities, c))
            }
            FilterExpr::Or(children) => {
                children.iter().any(|c| Self::evaluate_expr(qualities, c))
            }
            FilterExpr::Not(child) => !Self::evaluate_expr(qualities, child),
        }
    }

    fn value_matches(
        dimension: Dimension,
        quality: &NormalizedQuality,
        value: &str,
        operator: MatchOperator,
    ) -> bool {
        let value_lower = value.to_lowercase();

        let subtype_hit = match operator {
            MatchOperator::Exact => quality.subtypes.contains(&value_lower),
            MatchOperator::Contains => quality
                .subtypes
                .iter()
                .any(|s| s.contains(&value_lower) || value_lower.contains(s.as_str())),
        };
        if subtype_hit {
            return true;
        }

        // Backward-compatible matching against legacy prose sentences
        quality
            .prose
            .as_deref()
            .is_some_and(|prose| keywords::prose_matches(dimension, prose, value))
    }

    /// Full structural and semantic validation, reporting every error.
    ///
    /// Independent of [`parse`](Self::parse): unknown quality names and
    /// unknown `$`-operators, which parse skips, are reported here.
    #[must_use]
    pub fn validate(&self, spec: &JsonValue) -> FilterValidation {
        let mut errors = Vec::new();
        Self::validate_node(spec, "$root", &mut errors);
        FilterValidation {
            valid: errors.is_empty(),
            errors,
        }
    }

    fn validate_node(spec: &JsonValue, context: &str, errors: &mut Vec<String>) {
        let Some(object) = spec.as_object() else {
            errors.push(format!("{context}: filter must be an object"));
            return;
        };
        if object.is_empty() {
            errors.push(format!("{context}: filter object is empty"));
            return;
        }

        for (key, value) in object {
            match key.as_str() {
                "$and" | "$or" => match value.as_array() {
                    Some(items) if items.is_empty() => {
                        errors.push(format!("{key}: requires at least one child filter"));
                    }
                    Some(items) => {
                        for (i, item) in items.iter().enumerate() {
                            Self::validate_node(item, &format!("{key}[{i}]"), errors);
                        }
                    }
                    None => errors.push(format!("{key}: expects an array of filter objects")),
                },
                "$not" => Self::validate_node(value, "$not", errors),
                other if other.starts_with('$') => {
                    errors.push(format!("{other}: unknown operator (expected $and, $or, $not)"));
                }
                other => match other.parse::<Dimension>() {
                    Ok(quality) => {
                        if let Err(e) = Self::parse_leaf(quality, other, value) {
                            errors.push(e.to_string());
                        }
                    }
                    Err(_) => errors.push(format!(
                        "{other}: unknown quality (expected one of embodied, focus, mood, purpose, space, time, presence)"
                    )),
                },
            }
        }
    }

    /// Renders a human-readable reconstruction of a filter spec, e.g.
    /// `(mood.open AND NOT focus.narrow)`. Malformed input yields the fixed
    /// string `"Invalid filter"` rather than an error.
    #[must_use]
    pub fn describe(&self, spec: &JsonValue) -> String {
        match self.parse(spec) {
            Ok(expr) => Self::describe_expr(&expr),
            Err(_) => "Invalid filter".to_string(),
        }
    }

    fn describe_expr(expression: &FilterExpr) -> String {
        match expression {
            FilterExpr::Presence { quality, present } => {
                if *present {
                    format!("{quality} present")
                } else {
                    format!("{quality} absent")
                }
            }
            FilterExpr::Value {
                quality,
                values,
                operator,
            } => {
                let render = |v: &String| match operator {
                    MatchOperator::Exact => format!("{quality}.{v}"),
                    MatchOperator::Contains => format!("{quality} contains \"{v}\""),
                };
                if values.len() == 1 {
                    render(&values[0])
                } else {
                    let parts: Vec<String> = values.iter().map(render).collect();
                    format!("({})", parts.join(" OR "))
                }
            }
            FilterExpr::And(children) => {
                let parts: Vec<String> = children.iter().map(Self::describe_expr).collect();
                format!("({})", parts.join(" AND "))
            }
            FilterExpr::Or(children) => {
                let parts: Vec<String> = children.iter().map(Self::describe_expr).collect();
                format!("({})", parts.join(" OR "))
            }
            FilterExpr::Not(child) => format!("NOT {}", Self::describe_expr(child)),
        }
    }
}
