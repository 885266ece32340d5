//! zipstat core — table acquisition, master table construction, ranked subsets.
//!
//! This crate contains the pure stages of the pipeline:
//! - Zip-keyed table types and the `TableSource` trait
//! - Census ACS5 source and catalog keyword search
//! - Master builder (anchor left join, mean imputation, integer normalization)
//! - Tie-inclusive top-K selection with per-table ordering direction

pub mod data;
pub mod master;
pub mod ranking;

pub use data::{SourceError, SourceTable, TableSource, ZipRow, ZIP_CODE};
pub use master::{BuildError, DuplicateReport, MasterBuilder, MasterRow, MasterTable};
pub use ranking::{select_top_k, OrderingDirection, RankedSubset, SelectError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: stage outputs can cross the fetch worker pool.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<SourceTable>();
        require_sync::<SourceTable>();
        require_send::<SourceError>();
        require_sync::<SourceError>();
        require_send::<MasterTable>();
        require_sync::<MasterTable>();
        require_send::<RankedSubset>();
        require_sync::<RankedSubset>();
        require_send::<data::CensusSource>();
        require_sync::<data::CensusSource>();
    }

    /// TableSource must stay object safe; the runner only sees `&dyn TableSource`.
    #[test]
    fn table_source_is_object_safe() {
        fn _fetch(source: &dyn TableSource) -> Result<SourceTable, SourceError> {
            source.fetch("B01003", &["population", ZIP_CODE])
        }
    }
}
