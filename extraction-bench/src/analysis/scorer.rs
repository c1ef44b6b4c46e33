//! Field-level accuracy scoring of a structured response
//!
//! The expected value is the source of truth for shape. Weight 1.0 is
//! split evenly between the keys of each mapping and the elements of each
//! sequence, recursively, so the weights of all leaf records sum to 1.0 and
//! the score is `100 * earned`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::{canonical_date, normalize_text, numbers_match, parse_bool, parse_number};
use crate::schema::SchemaDescriptor;

/// Path used for the single record of an unparseable response
pub const ROOT_PATH: &str = "$";

/// Outcome of one compared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Matched,
    Mismatched,
    /// Key or element absent from the response
    Missing,
    /// Element the response has beyond the expected sequence; carries no weight
    Unexpected,
    /// The whole response could not be parsed
    Unparseable,
}

/// Comparison result for one leaf of the expected value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResult {
    pub path: String,
    pub matched: bool,
    pub status: FieldStatus,
    pub expected: Value,
    pub actual: Option<Value>,
    /// Share of the test's total weight this field carries
    pub weight: f64,
    /// `weight` when matched, else 0
    pub earned: f64,
}

impl FieldResult {
    fn new(path: String, status: FieldStatus, expected: &Value, actual: Option<&Value>, weight: f64) -> Self {
        let matched = status == FieldStatus::Matched;
        Self {
            path,
            matched,
            status,
            expected: expected.clone(),
            actual: actual.cloned(),
            weight,
            earned: if matched { weight } else { 0.0 },
        }
    }

    /// Whether this miss cost the response any score
    pub fn is_weighted_miss(&self) -> bool {
        !self.matched && self.weight > 0.0
    }
}

/// Score of one response against one expected value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyResult {
    /// 0.0 ..= 100.0
    pub score: f64,
    pub success: bool,
    pub fields: Vec<FieldResult>,
}

impl AccuracyResult {
    /// Result for a response that could not be recovered as structured data
    pub fn unparseable(expected: &Value) -> Self {
        Self {
            score: 0.0,
            success: false,
            fields: vec![FieldResult::new(
                ROOT_PATH.to_string(),
                FieldStatus::Unparseable,
                expected,
                None,
                1.0,
            )],
        }
    }

    pub fn is_unparseable(&self) -> bool {
        self.fields
            .iter()
            .any(|f| f.status == FieldStatus::Unparseable)
    }

    /// Fields that lost weight, in walk order
    pub fn misses(&self) -> impl Iterator<Item = &FieldResult> {
        self.fields.iter().filter(|f| f.is_weighted_miss())
    }

    pub fn matched_count(&self) -> usize {
        self.fields.iter().filter(|f| f.matched).count()
    }
}

/// Recursive comparer with configurable numeric tolerance
#[derive(Debug, Clone, Copy, Default)]
pub struct AccuracyScorer {
    numeric_tolerance: f64,
}

impl AccuracyScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative tolerance for numbers; 0.0 means exact
    pub fn with_numeric_tolerance(mut self, tolerance: f64) -> Self {
        self.numeric_tolerance = tolerance.max(0.0);
        self
    }

    /// Score `actual` against `expected`.
    ///
    /// `None` or `null` for `actual` means the response was unparseable and
    /// always yields 0, even when `expected` has no fields.
    pub fn score(
        &self,
        expected: &Value,
        actual: Option<&Value>,
        schema: Option<&SchemaDescriptor>,
    ) -> AccuracyResult {
        let actual = match actual {
            None | Some(Value::Null) => return AccuracyResult::unparseable(expected),
            Some(v) => v,
        };

        if is_empty_container(expected) {
            return AccuracyResult {
                score: 100.0,
                success: true,
                fields: Vec::new(),
            };
        }

        // Declared types only loosen the response; the walk follows `expected`
        let coerced = schema.map(|s| s.coerce(actual));
        let actual = coerced.as_ref().unwrap_or(actual);

        let mut fields = Vec::new();
        self.walk(expected, actual, ROOT_PATH.to_string(), 1.0, &mut fields);

        let earned: f64 = fields.iter().map(|f| f.earned).sum();
        let score = round_score(100.0 * earned);

        AccuracyResult {
            score,
            success: score > 0.0,
            fields,
        }
    }

    fn walk(
        &self,
        expected: &Value,
        actual: &Value,
        path: String,
        weight: f64,
        out: &mut Vec<FieldResult>,
    ) {
        match expected {
            Value::Object(map) if !map.is_empty() => {
                let Some(actual_map) = actual.as_object() else {
                    out.push(FieldResult::new(path, FieldStatus::Mismatched, expected, Some(actual), weight));
                    return;
                };
                let share = weight / map.len() as f64;
                for (key, child) in map {
                    let child_path = format!("{}.{}", path, key);
                    match actual_map.get(key) {
                        Some(actual_child) => self.walk(child, actual_child, child_path, share, out),
                        None => out.push(FieldResult::new(child_path, FieldStatus::Missing, child, None, share)),
                    }
                }
            }
            Value::Array(items) if !items.is_empty() => {
                let Some(actual_items) = actual.as_array() else {
                    out.push(FieldResult::new(path, FieldStatus::Mismatched, expected, Some(actual), weight));
                    return;
                };
                let share = weight / items.len() as f64;
                for (i, item) in items.iter().enumerate() {
                    let elem_path = format!("{}[{}]", path, i);
                    match actual_items.get(i) {
                        Some(actual_item) => self.walk(item, actual_item, elem_path, share, out),
                        None => out.push(FieldResult::new(elem_path, FieldStatus::Missing, item, None, share)),
                    }
                }
                for (i, extra) in actual_items.iter().enumerate().skip(items.len()) {
                    out.push(FieldResult::new(
                        format!("{}[{}]", path, i),
                        FieldStatus::Unexpected,
                        &Value::Null,
                        Some(extra),
                        0.0,
                    ));
                }
            }
            _ => {
                let status = if self.leaf_matches(expected, actual) {
                    FieldStatus::Matched
                } else {
                    FieldStatus::Mismatched
                };
                out.push(FieldResult::new(path, status, expected, Some(actual), weight));
            }
        }
    }

    fn leaf_matches(&self, expected: &Value, actual: &Value) -> bool {
        match (expected, actual) {
            (Value::Null, Value::Null) => true,
            (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.trim().is_empty(),
            (Value::Null, _) | (_, Value::Null) => false,

            // Empty containers: nothing to check beyond the shape
            (Value::Array(_), Value::Array(a)) => a.is_empty(),
            (Value::Object(_), Value::Object(_)) => true,
            (Value::Array(_) | Value::Object(_), _) => false,

            (Value::Bool(e), Value::Bool(a)) => e == a,
            (Value::Bool(e), Value::String(s)) => parse_bool(s) == Some(*e),

            (Value::Number(e), _) => match (e.as_f64(), number_of(actual)) {
                (Some(e), Some(a)) => numbers_match(e, a, self.numeric_tolerance),
                _ => false,
            },

            (Value::String(e), Value::String(a)) => {
                normalize_text(e) == normalize_text(a) || dates_equal(e, a)
            }
            (Value::String(e), Value::Number(a)) => match (parse_number(e), a.as_f64()) {
                (Some(e), Some(a)) => numbers_match(e, a, self.numeric_tolerance),
                _ => false,
            },
            (Value::String(e), Value::Bool(a)) => parse_bool(e) == Some(*a),

            _ => false,
        }
    }
}

/// Score with default options
pub fn score(expected: &Value, actual: Option<&Value>, schema: Option<&SchemaDescriptor>) -> AccuracyResult {
    AccuracyScorer::new().score(expected, actual, schema)
}

/// A top-level `{}` or `[]` has no fields to check
fn is_empty_container(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn dates_equal(expected: &str, actual: &str) -> bool {
    matches!((canonical_date(expected), canonical_date(actual)), (Some(e), Some(a)) if e == a)
}

/// Round to 1e-6 so equal-weight splits that do not sum exactly still give 100
fn round_score(raw: f64) -> f64 {
    ((raw * 1e6).round() / 1e6).clamp(0.0, 100.0)
}
