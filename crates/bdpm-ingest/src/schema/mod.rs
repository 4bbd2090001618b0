//! Column schemas for BDPM source files
//!
//! A schema is the ordered list of columns of one tab-separated file. Each
//! column is either a bare name (the raw text is passed through untouched) or
//! a typed declaration carrying its own parameters: a validation pattern,
//! a list separator, date formats, a truthy literal, or a closed set of
//! allowed values. Column kinds form a closed enum, so the decoder matches
//! them exhaustively.
//!
//! Schemas are usually built in Rust (see [`registry`]) but can also be read
//! from JSON, where a bare name is a string and a typed column is an object
//! tagged by `type`:
//!
//! ```json
//! [
//!   { "name": "CIS", "type": "string", "pattern": "\\d{8}" },
//!   "nom",
//!   { "name": "voieAdministration", "type": "array", "sep": ";" },
//!   { "name": "dateAvisCT", "type": "date", "format": "YYYYMMDD", "toFormat": "DD/MM/YYYY" },
//!   { "name": "surveillance", "type": "string", "transform": "yes_no" }
//! ]
//! ```

pub mod registry;

pub use registry::{SchemaOverrides, SchemaRegistry, SourceFile};

use bdpm_common::{BdpmError, Result};
use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;

/// Default separator for `array` columns
pub const DEFAULT_SEPARATOR: &str = ";";

/// Default truthy literal for `bool` columns
pub const DEFAULT_TRUTHY: &str = "true";

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

fn default_truthy() -> String {
    DEFAULT_TRUTHY.to_string()
}

/// Validation regex for `string` columns
///
/// The pattern must match the whole (trimmed) value.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", source))
            .map_err(|e| BdpmError::config(format!("invalid pattern `{}`: {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl TryFrom<String> for Pattern {
    type Error = BdpmError;

    fn try_from(source: String) -> Result<Self> {
        Pattern::new(&source)
    }
}

/// Date layout written with `YYYY`, `MM` and `DD` tokens
///
/// Anything else must be a non-alphabetic literal (`/`, `-`, space...).
/// `DD/MM/YYYY`, `YYYYMMDD` and `YYYY-MM-DD` are the layouts the publisher
/// uses.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct DateFormat {
    source: String,
    strftime: String,
}

impl DateFormat {
    pub fn new(source: &str) -> Result<Self> {
        let mut strftime = String::with_capacity(source.len() + 3);
        let (mut year, mut month, mut day) = (0, 0, 0);
        let mut rest = source;

        while let Some(c) = rest.chars().next() {
            if let Some(tail) = rest.strip_prefix("YYYY") {
                strftime.push_str("%Y");
                year += 1;
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("MM") {
                strftime.push_str("%m");
                month += 1;
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix("DD") {
                strftime.push_str("%d");
                day += 1;
                rest = tail;
            } else if c.is_alphanumeric() {
                return Err(BdpmError::config(format!(
                    "unsupported token `{}` in date format `{}`",
                    c, source
                )));
            } else {
                if c == '%' {
                    strftime.push('%');
                }
                strftime.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }

        if (year, month, day) != (1, 1, 1) {
            return Err(BdpmError::config(format!(
                "date format `{}` must contain YYYY, MM and DD exactly once",
                source
            )));
        }

        Ok(Self {
            source: source.to_string(),
            strftime,
        })
    }

    pub fn parse(&self, value: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(value, &self.strftime).ok()
    }

    pub fn format(&self, date: NaiveDate) -> String {
        date.format(&self.strftime).to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl TryFrom<String> for DateFormat {
    type Error = BdpmError;

    fn try_from(source: String) -> Result<Self> {
        DateFormat::new(&source)
    }
}

/// Named value transforms
///
/// A transform replaces the column's type rule entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// `Oui`/`Non` in any case to a boolean
    YesNo,
    /// `65%` or `65 %` to the integer 65
    Percent,
}

/// Type rule of a typed column
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ColumnKind {
    String {
        #[serde(default)]
        pattern: Option<Pattern>,
    },
    Array {
        #[serde(default = "default_separator")]
        sep: String,
    },
    Date {
        format: DateFormat,
        #[serde(default, rename = "toFormat")]
        to_format: Option<DateFormat>,
    },
    Bool {
        #[serde(default = "default_truthy")]
        truthy: String,
    },
    Float,
    Int,
    Enum {
        vals: Vec<String>,
    },
}

/// A typed column declaration
#[derive(Debug, Clone, Deserialize)]
pub struct TypedColumn {
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
    #[serde(default)]
    pub transform: Option<Transform>,
}

/// One column of a source file
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ColumnRepr")]
pub enum Column {
    /// Raw pass-through, no trimming or coercion
    Raw(String),
    Typed(TypedColumn),
}

// Routed through serde_json::Value so that an unknown `type` reports serde's
// "unknown variant" message instead of the opaque untagged-enum error.
#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnRepr {
    Name(String),
    Typed(serde_json::Value),
}

impl TryFrom<ColumnRepr> for Column {
    type Error = String;

    fn try_from(repr: ColumnRepr) -> std::result::Result<Self, String> {
        match repr {
            ColumnRepr::Name(name) => Ok(Column::Raw(name)),
            ColumnRepr::Typed(value) => {
                let name = value
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("<unnamed>")
                    .to_string();
                serde_json::from_value::<TypedColumn>(value)
                    .map(Column::Typed)
                    .map_err(|e| format!("column `{}`: {}", name, e))
            },
        }
    }
}

impl Column {
    pub fn raw(name: &str) -> Self {
        Column::Raw(name.to_string())
    }

    fn typed(name: &str, kind: ColumnKind) -> Self {
        Column::Typed(TypedColumn {
            name: name.to_string(),
            kind,
            transform: None,
        })
    }

    /// Trimmed string without validation
    pub fn string(name: &str) -> Self {
        Self::typed(name, ColumnKind::String { pattern: None })
    }

    /// Trimmed string that must fully match `pattern` when non-empty
    pub fn matching(name: &str, pattern: &str) -> Result<Self> {
        Ok(Self::typed(
            name,
            ColumnKind::String {
                pattern: Some(Pattern::new(pattern)?),
            },
        ))
    }

    pub fn array(name: &str, sep: &str) -> Self {
        Self::typed(
            name,
            ColumnKind::Array {
                sep: sep.to_string(),
            },
        )
    }

    pub fn date(name: &str, format: &str) -> Result<Self> {
        Ok(Self::typed(
            name,
            ColumnKind::Date {
                format: DateFormat::new(format)?,
                to_format: None,
            },
        ))
    }

    /// Date re-serialized from `format` to `to_format`
    pub fn date_as(name: &str, format: &str, to_format: &str) -> Result<Self> {
        Ok(Self::typed(
            name,
            ColumnKind::Date {
                format: DateFormat::new(format)?,
                to_format: Some(DateFormat::new(to_format)?),
            },
        ))
    }

    pub fn boolean(name: &str, truthy: &str) -> Self {
        Self::typed(
            name,
            ColumnKind::Bool {
                truthy: truthy.to_string(),
            },
        )
    }

    pub fn float(name: &str) -> Self {
        Self::typed(name, ColumnKind::Float)
    }

    pub fn int(name: &str) -> Self {
        Self::typed(name, ColumnKind::Int)
    }

    pub fn one_of(name: &str, vals: &[&str]) -> Self {
        Self::typed(
            name,
            ColumnKind::Enum {
                vals: vals.iter().map(|v| v.to_string()).collect(),
            },
        )
    }

    /// Attach a transform; a raw column becomes a typed string column
    pub fn with_transform(self, transform: Transform) -> Self {
        match self {
            Column::Raw(name) => Column::Typed(TypedColumn {
                name,
                kind: ColumnKind::String { pattern: None },
                transform: Some(transform),
            }),
            Column::Typed(mut typed) => {
                typed.transform = Some(transform);
                Column::Typed(typed)
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Column::Raw(name) => name,
            Column::Typed(typed) => &typed.name,
        }
    }
}

/// Ordered, validated column list of one source file
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Build a schema, rejecting empty or duplicate names and degenerate
    /// parameters (empty separator, empty enum set)
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            return Err(BdpmError::config("schema has no columns"));
        }

        let mut seen = HashSet::new();
        for column in &columns {
            let name = column.name();
            if name.trim().is_empty() {
                return Err(BdpmError::config("column with empty name"));
            }
            if !seen.insert(name) {
                return Err(BdpmError::config(format!("duplicate column `{}`", name)));
            }
            if let Column::Typed(typed) = column {
                match &typed.kind {
                    ColumnKind::Array { sep } if sep.is_empty() => {
                        return Err(BdpmError::config(format!(
                            "column `{}`: array separator cannot be empty",
                            name
                        )));
                    },
                    ColumnKind::Enum { vals } if vals.is_empty() => {
                        return Err(BdpmError::config(format!(
                            "column `{}`: enum has no allowed values",
                            name
                        )));
                    },
                    _ => {},
                }
            }
        }

        Ok(Self { columns })
    }

    /// Parse a JSON column list
    pub fn from_json(json: &str) -> Result<Self> {
        let columns: Vec<Column> =
            serde_json::from_str(json).map_err(|e| BdpmError::config(e.to_string()))?;
        Self::new(columns)
    }

    /// Same as [`Schema::from_json`], from an already parsed value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let columns: Vec<Column> =
            serde_json::from_value(value).map_err(|e| BdpmError::config(e.to_string()))?;
        Self::new(columns)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(Column::name)
    }
}
