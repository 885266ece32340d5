//! Tie-inclusive top-K selection over indicator tables.
//!
//! Rows are ranked on the raw indicator value, never aggregated per zip code.
//! The boundary is the k-th ranked value; every row at least as extreme as the
//! boundary is kept, so ties on the boundary all make it in and the result
//! may hold more than `k` rows.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::data::table::{SourceTable, ZipRow, ZIP_CODE};

/// Which end of the value range counts as most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingDirection {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
}

impl OrderingDirection {
    pub fn is_descending(self) -> bool {
        matches!(self, Self::Descending)
    }
}

impl std::fmt::Display for OrderingDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ascending => write!(f, "ascending"),
            Self::Descending => write!(f, "descending"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("table {table_id} is empty and cannot be ranked")]
    EmptyTable { table_id: String },

    #[error("k must be at least 1 (got {k})")]
    InvalidK { k: usize },

    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

/// The selected rows of one indicator table.
#[derive(Debug, Clone)]
pub struct RankedSubset {
    pub table_id: String,
    pub value_column: String,
    pub direction: OrderingDirection,
    pub k: usize,
    /// Columns: `zip_code` then the value column, most severe first.
    pub frame: DataFrame,
}

impl RankedSubset {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Rows beyond `k` admitted by boundary ties.
    pub fn tie_overflow(&self) -> usize {
        self.height().saturating_sub(self.k)
    }

    pub fn rows(&self) -> Result<Vec<ZipRow>, SelectError> {
        let zips = self.frame.column(ZIP_CODE)?.str()?;
        let values = self.frame.column(self.value_column.as_str())?.f64()?;

        Ok(zips
            .into_iter()
            .zip(values.into_iter())
            .map(|(zip, value)| ZipRow {
                zip_code: zip.unwrap_or_default().to_string(),
                value,
            })
            .collect())
    }
}

/// Select the top `k` rows of `table` in `direction`, keeping boundary ties.
///
/// Rows with a missing value cannot be ranked and are left out. Fails with
/// [`SelectError::EmptyTable`] when nothing is rankable.
pub fn select_top_k(
    table: &SourceTable,
    k: usize,
    direction: OrderingDirection,
) -> Result<RankedSubset, SelectError> {
    if k == 0 {
        return Err(SelectError::InvalidK { k });
    }

    let empty = || SelectError::EmptyTable {
        table_id: table.table_id.clone(),
    };
    if table.is_empty() {
        return Err(empty());
    }

    let value = table.value_column.as_str();
    let sorted = table
        .to_frame()?
        .lazy()
        .filter(col(value).is_not_null())
        .sort(
            [value],
            SortMultipleOptions::default()
                .with_order_descending(direction.is_descending())
                .with_maintain_order(true),
        )
        .collect()?;

    if sorted.height() == 0 {
        return Err(empty());
    }

    let boundary_idx = k.min(sorted.height()) - 1;
    let boundary = sorted
        .column(value)?
        .f64()?
        .get(boundary_idx)
        .ok_or_else(empty)?;

    let within = match direction {
        OrderingDirection::Ascending => col(value).lt_eq(lit(boundary)),
        OrderingDirection::Descending => col(value).gt_eq(lit(boundary)),
    };

    let frame = sorted
        .lazy()
        .filter(within)
        .select([col(ZIP_CODE), col(value)])
        .collect()?;

    debug!(
        table_id = %table.table_id,
        %direction,
        k,
        boundary,
        selected = frame.height(),
        "ranked subset selected"
    );

    Ok(RankedSubset {
        table_id: table.table_id.clone(),
        value_column: table.value_column.clone(),
        direction,
        k,
        frame,
    })
}
