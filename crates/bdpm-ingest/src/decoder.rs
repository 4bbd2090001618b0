//! Line decoder
//!
//! Turns the tab-split fields of one line into a [`Record`] according to a
//! [`Schema`]. Decoding is total: a field that fails its rule never aborts
//! the line. It becomes absent or a sentinel value, and a [`Diagnostic`] is
//! returned next to the record for the caller to log.

use crate::schema::{Column, ColumnKind, Schema, Transform, TypedColumn};
use chrono::NaiveDate;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use std::fmt;

/// A decoded field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    List(Vec<String>),
    Date(NaiveDate),
    Bool(bool),
    Float(f64),
    Int(i64),
    /// A numeric field that failed to parse
    NotANumber,
    /// A date field that failed to parse
    InvalidDate,
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Text(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Date(date) => serializer.collect_str(&date.format("%Y-%m-%d")),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::NotANumber | Value::InvalidDate => serializer.serialize_none(),
        }
    }
}

/// One decoded line, fields in schema order
///
/// Every schema column has an entry. `None` means the field is absent: the
/// line was short, the value was empty, or it failed validation. Absent
/// fields are left out of the JSON form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Option<Value>)>,
}

impl Record {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<Value>) {
        self.fields.push((name.into(), value));
    }

    /// Value of `name`, `None` if absent or not in the schema
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Value>)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn present_count(&self) -> usize {
        self.fields.iter().filter(|(_, v)| v.is_some()).count()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.present_count()))?;
        for (name, value) in &self.fields {
            if let Some(value) = value {
                map.serialize_entry(name, value)?;
            }
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Value present but rejected (pattern mismatch, value outside enum)
    Validation,
    /// Value could not be converted (date, number, yes/no)
    Parse,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Validation => f.write_str("validation"),
            DiagnosticKind::Parse => f.write_str("parse"),
        }
    }
}

/// A per-field problem found while decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub field: String,
    pub raw: String,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error on `{}` ({:?}): {}",
            self.kind, self.field, self.raw, self.message
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub record: Record,
    pub diagnostics: Vec<Diagnostic>,
}

impl Decoded {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

struct FieldFailure {
    kind: DiagnosticKind,
    message: String,
    fallback: Option<Value>,
}

impl FieldFailure {
    fn validation(message: String) -> Self {
        Self {
            kind: DiagnosticKind::Validation,
            message,
            fallback: None,
        }
    }

    fn parse(message: String, fallback: Option<Value>) -> Self {
        Self {
            kind: DiagnosticKind::Parse,
            message,
            fallback,
        }
    }
}

type FieldResult = std::result::Result<Option<Value>, FieldFailure>;

/// Decode one line's fields against `schema`
///
/// Fields are matched to columns by position. Missing trailing fields are
/// absent, extra fields are ignored.
pub fn decode_line<S: AsRef<str>>(schema: &Schema, fields: &[S]) -> Decoded {
    let mut record = Record::with_capacity(schema.len());
    let mut diagnostics = Vec::new();

    for (index, column) in schema.columns().iter().enumerate() {
        let raw = fields.get(index).map(AsRef::as_ref);
        let value = match decode_field(column, raw) {
            Ok(value) => value,
            Err(failure) => {
                diagnostics.push(Diagnostic {
                    field: column.name().to_string(),
                    raw: raw.unwrap_or_default().to_string(),
                    kind: failure.kind,
                    message: failure.message,
                });
                failure.fallback
            },
        };
        record.push(column.name(), value);
    }

    Decoded {
        record,
        diagnostics,
    }
}

fn decode_field(column: &Column, raw: Option<&str>) -> FieldResult {
    let Some(raw) = raw else {
        return Ok(None);
    };

    match column {
        Column::Raw(_) => Ok(Some(Value::Text(raw.to_string()))),
        Column::Typed(TypedColumn {
            transform: Some(transform),
            ..
        }) => apply_transform(*transform, raw),
        Column::Typed(typed) => decode_kind(&typed.kind, raw),
    }
}

fn decode_kind(kind: &ColumnKind, raw: &str) -> FieldResult {
    let trimmed = raw.trim();

    match kind {
        ColumnKind::String { pattern } => {
            if let Some(pattern) = pattern {
                if !raw.is_empty() && !pattern.is_match(trimmed) {
                    return Err(FieldFailure::validation(format!(
                        "does not match pattern `{}`",
                        pattern.as_str()
                    )));
                }
            }
            Ok(Some(Value::Text(trimmed.to_string())))
        },
        ColumnKind::Array { sep } => {
            if trimmed.is_empty() {
                return Ok(None);
            }
            let items = trimmed
                .split(sep.as_str())
                .map(|item| item.trim().to_string())
                .collect();
            Ok(Some(Value::List(items)))
        },
        ColumnKind::Date { format, to_format } => {
            if trimmed.is_empty() {
                return Ok(None);
            }
            match format.parse(trimmed) {
                Some(date) => Ok(Some(match to_format {
                    Some(target) => Value::Text(target.format(date)),
                    None => Value::Date(date),
                })),
                None => Err(FieldFailure::parse(
                    format!("not a date in format `{}`", format.as_str()),
                    Some(Value::InvalidDate),
                )),
            }
        },
        ColumnKind::Bool { truthy } => Ok(Some(Value::Bool(raw == truthy))),
        ColumnKind::Float => {
            if trimmed.is_empty() {
                return Ok(None);
            }
            match trimmed.replace(',', ".").parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(Some(Value::Float(value))),
                _ => Err(FieldFailure::parse(
                    "not a decimal number".to_string(),
                    Some(Value::NotANumber),
                )),
            }
        },
        ColumnKind::Int => {
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed
                .parse::<i64>()
                .map(|value| Some(Value::Int(value)))
                .map_err(|_| {
                    FieldFailure::parse("not an integer".to_string(), Some(Value::NotANumber))
                })
        },
        ColumnKind::Enum { vals } => {
            if trimmed.is_empty() {
                return Ok(None);
            }
            if vals.iter().any(|v| v == trimmed) {
                Ok(Some(Value::Text(trimmed.to_string())))
            } else {
                Err(FieldFailure::validation(format!(
                    "not one of [{}]",
                    vals.join(", ")
                )))
            }
        },
    }
}

fn apply_transform(transform: Transform, raw: &str) -> FieldResult {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    match transform {
        Transform::YesNo => {
            if trimmed.eq_ignore_ascii_case("oui") {
                Ok(Some(Value::Bool(true)))
            } else if trimmed.eq_ignore_ascii_case("non") {
                Ok(Some(Value::Bool(false)))
            } else {
                Err(FieldFailure::parse("expected Oui or Non".to_string(), None))
            }
        },
        Transform::Percent => {
            let digits = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
            digits
                .parse::<i64>()
                .map(|value| Some(Value::Int(value)))
                .map_err(|_| {
                    FieldFailure::parse("not a percentage".to_string(), Some(Value::NotANumber))
                })
        },
    }
}
