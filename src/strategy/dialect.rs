//! SQL dialect seam.
//!
//! The strategy is dialect-neutral; everything provider-specific — name
//! quoting, parameter tokens, identity retrieval — goes through this trait.

use crate::schema::{ColumnSchema, TableSchema};

/// Provider-specific SQL rendering.
pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Render a table reference, optionally namespace-qualified.
    fn table_reference(&self, namespace: Option<&str>, table: &str) -> String;

    /// Render an alias-qualified column reference (e.g. `t0.Name`).
    fn qualify_column(&self, alias: &str, column: &str) -> String {
        format!("{alias}.{column}")
    }

    /// Render the SQL token for a named parameter.
    fn parameter_token(&self, name: &str) -> String;

    /// Whether the insert statement itself returns the generated key. When
    /// false, the strategy compiles a separate identity-retrieval command.
    fn batch_scope_identity(&self) -> bool;

    /// Clause appended to an insert to return the generated key, when the
    /// dialect supports batch-scope identity.
    fn insert_returning(&self, key: &str) -> Option<String>;

    /// The provider identity query used by the identify command.
    fn identity_query(&self, table: &TableSchema, key: &ColumnSchema) -> String;
}

/// PostgreSQL rendering: the key comes back from `INSERT ... RETURNING`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn table_reference(&self, namespace: Option<&str>, table: &str) -> String {
        match namespace {
            Some(ns) => format!("\"{ns}\".{table}"),
            None => table.to_string(),
        }
    }

    fn parameter_token(&self, name: &str) -> String {
        format!(":{name}")
    }

    fn batch_scope_identity(&self) -> bool {
        true
    }

    fn insert_returning(&self, key: &str) -> Option<String> {
        Some(format!(" RETURNING {key}"))
    }

    fn identity_query(&self, table: &TableSchema, key: &ColumnSchema) -> String {
        format!(
            "SELECT currval(pg_get_serial_sequence('{}', '{}')) AS {}",
            table.table, key.name, key.name
        )
    }
}

/// SQL Server rendering: no returning clause; the generated key is fetched
/// with a separate `SCOPE_IDENTITY()` query.
#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlDialect;

impl SqlDialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "mssql"
    }

    fn table_reference(&self, namespace: Option<&str>, table: &str) -> String {
        match namespace {
            Some(ns) => format!("[{ns}].[{table}]"),
            None => format!("[{table}]"),
        }
    }

    fn parameter_token(&self, name: &str) -> String {
        format!("@{name}")
    }

    fn batch_scope_identity(&self) -> bool {
        false
    }

    fn insert_returning(&self, _key: &str) -> Option<String> {
        None
    }

    fn identity_query(&self, _table: &TableSchema, key: &ColumnSchema) -> String {
        format!("SELECT CAST(SCOPE_IDENTITY() AS bigint) AS {}", key.name)
    }
}
