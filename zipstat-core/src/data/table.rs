//! Zip-keyed table types shared by every stage.
//!
//! A [`SourceTable`] is what a [`TableSource`](super::provider::TableSource)
//! hands back: one value column plus `zip_code`. Conversion into a polars
//! [`DataFrame`] happens here so the builder and selector never see raw rows.

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Name of the join key column carried by every table.
pub const ZIP_CODE: &str = "zip_code";

/// Width of a zip code tabulation area identifier.
pub const ZIP_WIDTH: usize = 5;

/// One zip code and its reported value. `None` means the value is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZipRow {
    pub zip_code: String,
    pub value: Option<f64>,
}

impl ZipRow {
    pub fn new(zip_code: impl AsRef<str>, value: Option<f64>) -> Self {
        Self {
            zip_code: normalize_zip(zip_code.as_ref()),
            value,
        }
    }
}

/// A fetched table: rows for one table id, with its value column already renamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    pub table_id: String,
    pub value_column: String,
    pub rows: Vec<ZipRow>,
}

impl SourceTable {
    pub fn new(
        table_id: impl Into<String>,
        value_column: impl Into<String>,
        rows: Vec<ZipRow>,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            value_column: value_column.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows whose value is missing.
    pub fn missing_count(&self) -> usize {
        self.rows.iter().filter(|r| r.value.is_none()).count()
    }

    /// Build a frame with columns `[value_column, zip_code]`.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        self.to_frame_as(&self.value_column)
    }

    /// Same as [`to_frame`](Self::to_frame) with the value column renamed.
    pub fn to_frame_as(&self, value_name: &str) -> PolarsResult<DataFrame> {
        let values: Vec<Option<f64>> = self.rows.iter().map(|r| r.value).collect();
        let zips: Vec<&str> = self.rows.iter().map(|r| r.zip_code.as_str()).collect();
        DataFrame::new(vec![
            Column::new(value_name.into(), values),
            Column::new(ZIP_CODE.into(), zips),
        ])
    }
}

/// Left-pad a numeric zip code to [`ZIP_WIDTH`]; anything else is only trimmed.
pub fn normalize_zip(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty()
        && trimmed.len() < ZIP_WIDTH
        && trimmed.bytes().all(|b| b.is_ascii_digit())
    {
        format!("{trimmed:0>width$}", width = ZIP_WIDTH)
    } else {
        trimmed.to_string()
    }
}
