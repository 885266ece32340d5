//! Table source trait and structured error types.
//!
//! The TableSource trait abstracts over where statistical tables come from
//! (the Census API, an in-memory fixture) so the pipeline can be driven by a
//! fake in tests.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::table::{SourceTable, ZIP_CODE};

/// Structured error types for fetch operations.
///
/// Displayed verbatim in CLI output and run reports.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("unknown table: {table_id}")]
    UnknownTable { table_id: String },

    #[error("schema mismatch for {table_id}: {detail}")]
    SchemaMismatch { table_id: String, detail: String },

    #[error("invalid column names for {table_id}: expected [value, \"zip_code\"], got {got:?}")]
    InvalidColumnNames { table_id: String, got: Vec<String> },
}

/// One entry of the upstream table catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub description: String,
}

/// Trait for table sources.
///
/// `output_columns` is the two-element rename list `[value, "zip_code"]`
/// applied to the raw estimate column and the geography column.
pub trait TableSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch one row per reported zip code for `table_id`.
    fn fetch(&self, table_id: &str, output_columns: &[&str]) -> Result<SourceTable, SourceError>;
}

/// Trait for sources that can enumerate their table catalog.
pub trait TableCatalog {
    fn list_tables(&self) -> Result<Vec<TableInfo>, SourceError>;
}

/// Validate a rename list and return the value column name.
pub fn value_column_name<'a>(
    table_id: &str,
    output_columns: &[&'a str],
) -> Result<&'a str, SourceError> {
    match output_columns {
        [value, zip] if !value.is_empty() && *zip == ZIP_CODE && *value != ZIP_CODE => {
            Ok(*value)
        }
        _ => Err(SourceError::InvalidColumnNames {
            table_id: table_id.to_string(),
            got: output_columns.iter().map(|c| c.to_string()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_column_accepts_value_then_zip() {
        assert_eq!(
            value_column_name("B01003", &["population", "zip_code"]),
            Ok("population")
        );
    }

    #[test]
    fn value_column_rejects_wrong_shapes() {
        assert!(value_column_name("B01003", &["population"]).is_err());
        assert!(value_column_name("B01003", &["zip_code", "population"]).is_err());
        assert!(value_column_name("B01003", &["", "zip_code"]).is_err());
        assert!(value_column_name("B01003", &["a", "zip_code", "b"]).is_err());
    }

    #[test]
    fn errors_display_table_id() {
        let err = SourceError::UnknownTable {
            table_id: "B99999".into(),
        };
        assert_eq!(err.to_string(), "unknown table: B99999");
    }
}
