//! Expected-output type descriptors
//!
//! A [`SchemaDescriptor`] describes the shape a provider response should take:
//! field names, nesting and optionality. It is loaded from a module's
//! `schema.json` or inferred from an expected value, and is only used to
//! make response parsing lenient and to render a schema hint into prompts.
//!
//! Two on-disk forms are accepted:
//!
//! ```json
//! { "title": "string", "salary": "number?", "skills": ["string"],
//!   "address": { "city": "string" }, "start": "date" }
//! ```
//!
//! or a JSON Schema object (`"type": "object"` with `"properties"`).

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::normalize::{parse_bool, parse_date, parse_number};

/// Type tag of one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Mapping(IndexMap<String, FieldType>),
    Sequence(Box<FieldType>),
    Optional(Box<FieldType>),
}

impl FieldType {
    /// The type with any `Optional` wrapper removed
    pub fn base(&self) -> &FieldType {
        match self {
            FieldType::Optional(inner) => inner.base(),
            other => other,
        }
    }

    pub fn is_optional(&self) -> bool {
        matches!(self, FieldType::Optional(_))
    }

    /// Type of a named child when this is a mapping
    pub fn child(&self, key: &str) -> Option<&FieldType> {
        match self.base() {
            FieldType::Mapping(fields) => fields.get(key),
            _ => None,
        }
    }

    /// Element type when this is a sequence
    pub fn element(&self) -> Option<&FieldType> {
        match self.base() {
            FieldType::Sequence(elem) => Some(elem),
            _ => None,
        }
    }

    fn optional(self) -> FieldType {
        match self {
            FieldType::Optional(_) => self,
            other => FieldType::Optional(Box::new(other)),
        }
    }

    fn scalar_from_tag(tag: &str) -> Option<FieldType> {
        match tag.trim().to_lowercase().as_str() {
            "string" | "str" | "text" => Some(FieldType::String),
            "number" | "integer" | "int" | "float" => Some(FieldType::Number),
            "boolean" | "bool" => Some(FieldType::Boolean),
            "date" | "datetime" | "date-time" => Some(FieldType::Date),
            _ => None,
        }
    }

    /// Compact JSON rendering used for prompt hints
    fn to_compact(&self) -> Value {
        match self {
            FieldType::String => Value::from("string"),
            FieldType::Number => Value::from("number"),
            FieldType::Boolean => Value::from("boolean"),
            FieldType::Date => Value::from("date (YYYY-MM-DD)"),
            FieldType::Mapping(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, t)| (k.clone(), t.to_compact()))
                    .collect::<Map<String, Value>>(),
            ),
            FieldType::Sequence(elem) => Value::Array(vec![elem.to_compact()]),
            FieldType::Optional(inner) => match inner.to_compact() {
                Value::String(s) => Value::String(format!("{} (optional)", s)),
                other => other,
            },
        }
    }
}

/// Errors raised while reading a schema definition
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Unknown type tag '{tag}' at {path}")]
    UnknownType { path: String, tag: String },

    #[error("Invalid schema node at {path}: {reason}")]
    Invalid { path: String, reason: String },
}

/// Field-name to field-type mapping describing an expected output
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDescriptor {
    root: FieldType,
}

impl SchemaDescriptor {
    /// Build a descriptor from top-level fields
    pub fn from_fields(fields: IndexMap<String, FieldType>) -> Self {
        Self {
            root: FieldType::Mapping(fields),
        }
    }

    /// Root type of the described value
    pub fn root(&self) -> &FieldType {
        &self.root
    }

    /// Top-level fields, empty when the root is not a mapping
    pub fn fields(&self) -> Option<&IndexMap<String, FieldType>> {
        match self.root.base() {
            FieldType::Mapping(fields) => Some(fields),
            _ => None,
        }
    }

    /// Parse a schema definition in compact or JSON Schema form
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let root = if is_json_schema(value) {
            parse_json_schema(value, "$")?
        } else {
            parse_compact(value, "$")?
        };
        Ok(Self { root })
    }

    /// Parse a schema definition from JSON text
    pub fn from_json_str(content: &str) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_str(content).map_err(|e| SchemaError::Invalid {
            path: "$".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_value(&value)
    }

    /// Infer a descriptor from an expected value.
    ///
    /// Strings that read as dates become `Date`, `null` becomes an optional
    /// string, and sequences take the type of their first element.
    pub fn infer(value: &Value) -> Self {
        Self {
            root: infer_type(value),
        }
    }

    /// Rewrite a parsed response toward the declared types.
    ///
    /// Fields the schema does not mention are passed through untouched.
    pub fn coerce(&self, value: &Value) -> Value {
        coerce_value(&self.root, value)
    }

    /// Schema rendering suitable for embedding in a prompt
    pub fn prompt_hint(&self) -> String {
        serde_json::to_string_pretty(&self.root.to_compact()).unwrap_or_default()
    }
}

fn is_json_schema(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.contains_key("$schema")
        || (obj.get("type").and_then(Value::as_str) == Some("object")
            && obj.get("properties").map(Value::is_object).unwrap_or(false))
}

fn parse_compact(value: &Value, path: &str) -> Result<FieldType, SchemaError> {
    match value {
        Value::String(tag) => {
            let (tag, optional) = match tag.strip_suffix('?') {
                Some(stripped) => (stripped, true),
                None => (tag.as_str(), false),
            };
            let ty = FieldType::scalar_from_tag(tag).ok_or_else(|| SchemaError::UnknownType {
                path: path.to_string(),
                tag: tag.to_string(),
            })?;
            Ok(if optional { ty.optional() } else { ty })
        }
        Value::Object(obj) => {
            let mut fields = IndexMap::new();
            for (key, child) in obj {
                let child_path = format!("{}.{}", path, key);
                fields.insert(key.clone(), parse_compact(child, &child_path)?);
            }
            Ok(FieldType::Mapping(fields))
        }
        Value::Array(items) if items.len() == 1 => {
            let elem = parse_compact(&items[0], &format!("{}[]", path))?;
            Ok(FieldType::Sequence(Box::new(elem)))
        }
        Value::Array(_) => Err(SchemaError::Invalid {
            path: path.to_string(),
            reason: "sequence types take exactly one element type".to_string(),
        }),
        other => Err(SchemaError::Invalid {
            path: path.to_string(),
            reason: format!("expected a type tag, object or array, got {}", other),
        }),
    }
}

fn parse_json_schema(value: &Value, path: &str) -> Result<FieldType, SchemaError> {
    let obj = value.as_object().ok_or_else(|| SchemaError::Invalid {
        path: path.to_string(),
        reason: "JSON Schema node must be an object".to_string(),
    })?;

    // "type" may be a string or a list such as ["string", "null"]
    let (type_name, nullable) = match obj.get("type") {
        Some(Value::String(t)) => (t.clone(), false),
        Some(Value::Array(types)) => {
            let nullable = types.iter().any(|t| t.as_str() == Some("null"));
            let first = types
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null")
                .unwrap_or("string")
                .to_string();
            (first, nullable)
        }
        Some(other) => {
            return Err(SchemaError::Invalid {
                path: path.to_string(),
                reason: format!("unsupported type value {}", other),
            })
        }
        None if obj.contains_key("properties") => ("object".to_string(), false),
        None => ("string".to_string(), false),
    };

    let ty = match type_name.as_str() {
        "object" => {
            let required: Vec<&str> = obj
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let mut fields = IndexMap::new();
            if let Some(Value::Object(props)) = obj.get("properties") {
                for (key, child) in props {
                    let child_ty = parse_json_schema(child, &format!("{}.{}", path, key))?;
                    let child_ty = if required.is_empty() || required.contains(&key.as_str()) {
                        child_ty
                    } else {
                        child_ty.optional()
                    };
                    fields.insert(key.clone(), child_ty);
                }
            }
            FieldType::Mapping(fields)
        }
        "array" => {
            let elem = match obj.get("items") {
                Some(items) => parse_json_schema(items, &format!("{}[]", path))?,
                None => FieldType::String,
            };
            FieldType::Sequence(Box::new(elem))
        }
        "string" => match obj.get("format").and_then(Value::as_str) {
            Some("date") | Some("date-time") => FieldType::Date,
            _ => FieldType::String,
        },
        other => FieldType::scalar_from_tag(other).ok_or_else(|| SchemaError::UnknownType {
            path: path.to_string(),
            tag: other.to_string(),
        })?,
    };

    Ok(if nullable { ty.optional() } else { ty })
}

fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::Null => FieldType::String.optional(),
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(_) => FieldType::Number,
        Value::String(s) if parse_date(s).is_some() => FieldType::Date,
        Value::String(_) => FieldType::String,
        Value::Array(items) => {
            let elem = items.first().map(infer_type).unwrap_or(FieldType::String);
            FieldType::Sequence(Box::new(elem))
        }
        Value::Object(obj) => FieldType::Mapping(
            obj.iter()
                .map(|(k, v)| (k.clone(), infer_type(v)))
                .collect(),
        ),
    }
}

/// Whole numbers stay integers so they compare equal to integer literals
fn number_value(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(Value::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map(Value::Number)
    }
}

fn coerce_value(ty: &FieldType, value: &Value) -> Value {
    match ty {
        FieldType::Optional(inner) => match value {
            Value::Null => Value::Null,
            Value::String(s) if s.trim().is_empty() => Value::Null,
            other => coerce_value(inner, other),
        },
        FieldType::Number => match value {
            Value::String(s) => parse_number(s)
                .and_then(number_value)
                .unwrap_or_else(|| value.clone()),
            other => other.clone(),
        },
        FieldType::Boolean => match value {
            Value::String(s) => parse_bool(s).map(Value::Bool).unwrap_or_else(|| value.clone()),
            Value::Number(n) if n.as_f64() == Some(1.0) => Value::Bool(true),
            Value::Number(n) if n.as_f64() == Some(0.0) => Value::Bool(false),
            other => other.clone(),
        },
        FieldType::String | FieldType::Date => value.clone(),
        FieldType::Mapping(fields) => match value {
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| {
                        let coerced = match fields.get(k) {
                            Some(field_ty) => coerce_value(field_ty, v),
                            None => v.clone(),
                        };
                        (k.clone(), coerced)
                    })
                    .collect(),
            ),
            other => other.clone(),
        },
        FieldType::Sequence(elem) => match value {
            Value::Array(items) => Value::Array(items.iter().map(|v| coerce_value(elem, v)).collect()),
            Value::Null => Value::Null,
            single => Value::Array(vec![coerce_value(elem, single)]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_compact_schema() {
        let schema = SchemaDescriptor::from_value(&json!({
            "title": "string",
            "salary": "number?",
            "skills": ["string"],
            "address": {"city": "string"},
            "start": "date"
        }))
        .unwrap();

        let fields = schema.fields().unwrap();
        assert_eq!(fields["title"], FieldType::String);
        assert!(fields["salary"].is_optional());
        assert_eq!(fields["salary"].base(), &FieldType::Number);
        assert_eq!(fields["skills"].element(), Some(&FieldType::String));
        assert_eq!(fields["address"].child("city"), Some(&FieldType::String));
        assert_eq!(fields["start"], FieldType::Date);
    }

    #[test]
    fn test_parse_compact_rejects_unknown_tag() {
        let err = SchemaDescriptor::from_value(&json!({"x": "uuid"})).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
        assert!(err.to_string().contains("$.x"));
    }

    #[test]
    fn test_parse_json_schema() {
        let schema = SchemaDescriptor::from_value(&json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "born": {"type": "string", "format": "date"},
                "age": {"type": ["integer", "null"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["name", "born", "tags"]
        }))
        .unwrap();

        let fields = schema.fields().unwrap();
        assert_eq!(fields["name"], FieldType::String);
        assert_eq!(fields["born"], FieldType::Date);
        assert!(fields["age"].is_optional());
        assert_eq!(fields["tags"].element(), Some(&FieldType::String));
    }

    #[test]
    fn test_infer_from_expected() {
        let schema = SchemaDescriptor::infer(&json!({
            "title": "Engineer",
            "posted": "2024-01-15",
            "remote": true,
            "skills": ["rust"],
            "bonus": null
        }));
        let fields = schema.fields().unwrap();
        assert_eq!(fields["title"], FieldType::String);
        assert_eq!(fields["posted"], FieldType::Date);
        assert_eq!(fields["remote"], FieldType::Boolean);
        assert!(fields["bonus"].is_optional());
    }

    #[test]
    fn test_coerce_lenient_types() {
        let schema = SchemaDescriptor::from_value(&json!({
            "salary": "number",
            "remote": "boolean",
            "skills": ["string"],
            "note": "string?"
        }))
        .unwrap();

        let coerced = schema.coerce(&json!({
            "salary": "120,000",
            "remote": "yes",
            "skills": "rust",
            "note": "  ",
            "extra": "kept"
        }));

        assert_eq!(coerced["salary"].as_f64(), Some(120000.0));
        assert_eq!(coerced["remote"], json!(true));
        assert_eq!(coerced["skills"], json!(["rust"]));
        assert_eq!(coerced["note"], Value::Null);
        assert_eq!(coerced["extra"], json!("kept"));
    }

    #[test]
    fn test_prompt_hint_mentions_fields() {
        let schema = SchemaDescriptor::from_value(&json!({"title": "string", "start": "date?"})).unwrap();
        let hint = schema.prompt_hint();
        assert!(hint.contains("\"title\": \"string\""));
        assert!(hint.contains("YYYY-MM-DD"));
        assert!(hint.contains("optional"));
    }
}
