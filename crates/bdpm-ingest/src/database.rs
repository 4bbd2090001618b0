//! SQLite target database
//!
//! The schema is dropped and recreated on every run, in a single
//! transaction, before any per-file script is executed.

use crate::statement::identifier;
use bdpm_common::{BdpmError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Column storage types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
    /// ISO `YYYY-MM-DD` text
    Date,
    /// 0/1 integer
    Boolean,
}

impl SqlType {
    pub fn as_sql(self) -> &'static str {
        match self {
            SqlType::Text | SqlType::Date => "TEXT",
            SqlType::Integer | SqlType::Boolean => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

/// Target table of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<(String, SqlType)>,
    pub primary_key: Vec<String>,
    /// Columns that get a secondary index
    pub indices: Vec<String>,
}

impl TableDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, ty: SqlType) -> Self {
        self.columns.push((name.to_string(), ty));
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn index(mut self, column: &str) -> Self {
        self.indices.push(column.to_string());
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(c, _)| c == name)
    }

    /// DROP, CREATE TABLE and CREATE INDEX statements
    pub fn ddl(&self) -> Vec<String> {
        let table = identifier(&self.name);
        let mut definitions: Vec<String> = self
            .columns
            .iter()
            .map(|(name, ty)| format!("{} {}", identifier(name), ty.as_sql()))
            .collect();

        if !self.primary_key.is_empty() {
            definitions.push(format!(
                "PRIMARY KEY ({})",
                self.primary_key
                    .iter()
                    .map(|c| identifier(c))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }

        let mut statements = vec![
            format!("DROP TABLE IF EXISTS {}", table),
            format!("CREATE TABLE {} ({})", table, definitions.join(", ")),
        ];

        for column in &self.indices {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                identifier(&format!("idx_{}_{}", self.name, column)),
                table,
                identifier(column)
            ));
        }

        statements
    }
}

fn database_error(e: sqlx::Error) -> BdpmError {
    BdpmError::Database(e.to_string())
}

/// Connection to the target SQLite database
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database at `url`
    ///
    /// A single connection is kept for the lifetime of the pool so that
    /// `sqlite::memory:` databases survive between calls.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(database_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(database_error)?;

        info!("Connected to database {}", url);
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drop and recreate every table in one transaction
    pub async fn recreate_schema<'t, I>(&self, tables: I) -> Result<()>
    where
        I: IntoIterator<Item = &'t TableDef>,
    {
        let mut tx = self.pool.begin().await.map_err(database_error)?;
        let mut count = 0;

        for table in tables {
            for statement in table.ddl() {
                debug!("{}", statement);
                sqlx::query(&statement)
                    .execute(&mut *tx)
                    .await
                    .map_err(database_error)?;
            }
            count += 1;
        }

        tx.commit().await.map_err(database_error)?;
        info!("Recreated {} tables", count);
        Ok(())
    }

    /// Execute a multi-statement script as-is
    ///
    /// Scripts produced by the pipeline carry their own transaction; if one
    /// fails midway the open transaction is rolled back.
    pub async fn execute_script(&self, script: &str) -> Result<u64> {
        match sqlx::raw_sql(script).execute(&self.pool).await {
            Ok(result) => Ok(result.rows_affected()),
            Err(e) => {
                if let Err(rollback) = sqlx::raw_sql("ROLLBACK").execute(&self.pool).await {
                    debug!("No transaction to roll back: {}", rollback);
                }
                warn!("Script execution failed: {}", e);
                Err(database_error(e))
            },
        }
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", identifier(table));
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(database_error)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
