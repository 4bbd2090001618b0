//! SQL statement builders
//!
//! A builder turns one decoded [`Record`] into one SQL statement, or into
//! nothing when the record carries no usable data for that strategy.
//! Values are rendered as SQL literals; the scripts are executed verbatim by
//! the database loader.

use crate::decoder::{Record, Value};

/// Per-file strategy mapping a record to a statement
pub trait StatementBuilder: Send + Sync {
    fn build(&self, record: &Record) -> Option<String>;
}

impl<F> StatementBuilder for F
where
    F: Fn(&Record) -> Option<String> + Send + Sync,
{
    fn build(&self, record: &Record) -> Option<String> {
        self(record)
    }
}

/// Single-quoted SQL string, inner quotes doubled
pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Double-quoted SQL identifier
pub fn identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Render a field value as a SQL literal
///
/// Absent values, empty strings and empty lists become `NULL`, as do the
/// decode failure sentinels.
pub fn literal(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "NULL".to_string();
    };

    match value {
        Value::Text(text) if text.is_empty() => "NULL".to_string(),
        Value::Text(text) => quote(text),
        Value::List(items) if items.is_empty() => "NULL".to_string(),
        Value::List(items) => quote(&items.join(";")),
        Value::Date(date) => quote(&date.format("%Y-%m-%d").to_string()),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        Value::Float(f) => f.to_string(),
        Value::Int(i) => i.to_string(),
        Value::NotANumber | Value::InvalidDate => "NULL".to_string(),
    }
}

fn is_null(value: Option<&Value>) -> bool {
    literal(value) == "NULL"
}

/// `INSERT INTO table (columns...) VALUES (...)` for every record
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    columns: Vec<String>,
    prefix: String,
}

impl InsertBuilder {
    pub fn new<I, S>(table: &str, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let prefix = format!(
            "INSERT INTO {} ({}) VALUES (",
            identifier(table),
            columns
                .iter()
                .map(|c| identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Self { columns, prefix }
    }
}

impl StatementBuilder for InsertBuilder {
    fn build(&self, record: &Record) -> Option<String> {
        let values = self
            .columns
            .iter()
            .map(|column| literal(record.get(column)))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("{}{});", self.prefix, values))
    }
}

/// `UPDATE table SET ... WHERE key = ...`, skipped when there is nothing to
/// match on or nothing to set
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    table: String,
    key: String,
    set: Vec<String>,
}

impl UpdateBuilder {
    pub fn new<I, S>(table: &str, key: &str, set: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.to_string(),
            key: key.to_string(),
            set: set.into_iter().map(Into::into).collect(),
        }
    }
}

impl StatementBuilder for UpdateBuilder {
    fn build(&self, record: &Record) -> Option<String> {
        let key = record.get(&self.key);
        if is_null(key) {
            return None;
        }
        if self.set.iter().all(|column| is_null(record.get(column))) {
            return None;
        }

        let assignments = self
            .set
            .iter()
            .map(|column| format!("{} = {}", identifier(column), literal(record.get(column))))
            .collect::<Vec<_>>()
            .join(", ");

        Some(format!(
            "UPDATE {} SET {} WHERE {} = {};",
            identifier(&self.table),
            assignments,
            identifier(&self.key),
            literal(key)
        ))
    }
}
