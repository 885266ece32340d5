//! Table acquisition: source trait, Census implementation, catalog search.

pub mod catalog;
pub mod census;
pub mod provider;
pub mod table;

pub use catalog::{find_tables, format_entry, search_tables};
pub use census::{CensusSettings, CensusSource};
pub use provider::{SourceError, TableCatalog, TableInfo, TableSource};
pub use table::{normalize_zip, SourceTable, ZipRow, ZIP_CODE};
