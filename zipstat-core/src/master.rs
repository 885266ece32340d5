//! Master zip code table: population joined with housing units.
//!
//! The population table is the anchor of a left join on `zip_code`. Every
//! anchor row survives exactly once; housing rows without an anchor are
//! dropped. Values still missing after the join are filled with the mean of
//! the column's non-missing values over the joined result, then both columns
//! are truncated to integers. The per-column fill value is reported in
//! [`MasterTable::imputation`].
//!
//! Duplicate zip codes in the anchor are reported, not removed.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::table::{SourceTable, ZIP_CODE};

pub const POPULATION: &str = "population";
pub const HOUSING_UNITS: &str = "housing_units";

const ROW_ORDER: &str = "__row_order";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("dataframe error: {0}")]
    Frame(#[from] PolarsError),
}

/// One row of the master table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterRow {
    pub zip_code: String,
    pub population: i64,
    pub housing_units: i64,
}

/// A zip code that occurs more than once in the anchor table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateKey {
    pub zip_code: String,
    pub count: usize,
}

/// Zip codes repeated in the anchor table, sorted by zip code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub keys: Vec<DuplicateKey>,
}

impl DuplicateReport {
    /// Count zip code occurrences and keep the ones seen more than once.
    pub fn from_table(table: &SourceTable) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for row in &table.rows {
            *counts.entry(row.zip_code.as_str()).or_default() += 1;
        }

        let keys = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(zip, count)| DuplicateKey {
                zip_code: zip.to_string(),
                count,
            })
            .collect();

        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Rows beyond the first for every duplicated zip code.
    pub fn extra_rows(&self) -> usize {
        self.keys.iter().map(|k| k.count - 1).sum()
    }
}

/// How missing values of one column were filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputationSummary {
    pub column: String,
    pub imputed_rows: usize,
    /// Mean of the non-missing values, or 0 when the column had none.
    pub fill_value: f64,
}

/// The master table plus what the builder found while making it.
#[derive(Debug, Clone)]
pub struct MasterTable {
    /// Columns: `zip_code` (str), `population` (i64), `housing_units` (i64).
    pub frame: DataFrame,
    pub duplicates: DuplicateReport,
    pub imputation: Vec<ImputationSummary>,
}

impl MasterTable {
    pub fn height(&self) -> usize {
        self.frame.height()
    }

    /// Typed view of the frame, in anchor order.
    pub fn rows(&self) -> Result<Vec<MasterRow>, BuildError> {
        let zips = self.frame.column(ZIP_CODE)?.str()?;
        let population = self.frame.column(POPULATION)?.i64()?;
        let housing = self.frame.column(HOUSING_UNITS)?.i64()?;

        Ok(zips
            .into_iter()
            .zip(population.into_iter())
            .zip(housing.into_iter())
            .map(|((zip, pop), units)| MasterRow {
                zip_code: zip.unwrap_or_default().to_string(),
                population: pop.unwrap_or(0),
                housing_units: units.unwrap_or(0),
            })
            .collect())
    }
}

/// Builds the master table.
pub struct MasterBuilder;

impl MasterBuilder {
    /// Left-join `housing` onto `population`, impute, and normalize types.
    pub fn build(
        population: &SourceTable,
        housing: &SourceTable,
    ) -> Result<MasterTable, BuildError> {
        let duplicates = DuplicateReport::from_table(population);
        if !duplicates.is_empty() {
            warn!(
                table_id = %population.table_id,
                zip_codes = duplicates.keys.len(),
                extra_rows = duplicates.extra_rows(),
                "anchor table has duplicate zip codes"
            );
        }

        let joined = Self::join(population, housing)?;

        let mut imputation = Vec::with_capacity(2);
        for name in [POPULATION, HOUSING_UNITS] {
            let values = joined.column(name)?.f64()?;
            let imputed_rows = values.null_count();
            let fill_value = match values.mean() {
                Some(mean) => mean,
                None => {
                    if imputed_rows > 0 {
                        warn!(column = name, "no values to average; imputing 0");
                    }
                    0.0
                }
            };
            if imputed_rows > 0 {
                info!(
                    column = name,
                    imputed_rows,
                    fill_value,
                    "imputing missing values with column mean"
                );
            }
            imputation.push(ImputationSummary {
                column: name.to_string(),
                imputed_rows,
                fill_value,
            });
        }

        let frame = joined
            .lazy()
            .select([
                col(ZIP_CODE),
                impute(POPULATION, imputation[0].fill_value),
                impute(HOUSING_UNITS, imputation[1].fill_value),
            ])
            .collect()?;

        debug!(preview = %frame.head(Some(3)), "master table head");

        Ok(MasterTable {
            frame,
            duplicates,
            imputation,
        })
    }

    /// Anchor-ordered left join. Housing is deduplicated by zip code first
    /// (first row wins) so the join never multiplies anchor rows.
    fn join(population: &SourceTable, housing: &SourceTable) -> Result<DataFrame, BuildError> {
        let anchor = population.to_frame_as(POPULATION)?;
        let right = housing
            .to_frame_as(HOUSING_UNITS)?
            .lazy()
            .unique_stable(Some(vec![ZIP_CODE.into()]), UniqueKeepStrategy::First);

        let joined = anchor
            .lazy()
            .with_row_index(ROW_ORDER, None)
            .left_join(right, col(ZIP_CODE), col(ZIP_CODE))
            .sort([ROW_ORDER], SortMultipleOptions::default())
            .select([col(ZIP_CODE), col(POPULATION), col(HOUSING_UNITS)])
            .collect()?;

        Ok(joined)
    }
}

/// Fill nulls with `fill` and truncate to integer.
fn impute(name: &str, fill: f64) -> Expr {
    col(name)
        .fill_null(lit(fill))
        .cast(DataType::Int64)
        .alias(name)
}
