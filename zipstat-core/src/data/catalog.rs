//! Keyword search over a table catalog.

use super::provider::{SourceError, TableCatalog, TableInfo};

/// Tables whose description contains `keyword`, case-insensitively.
///
/// Catalog order is preserved and repeated descriptions are reported once.
pub fn search_tables<'a>(tables: &'a [TableInfo], keyword: &str) -> Vec<&'a TableInfo> {
    let needle = keyword.trim().to_uppercase();
    let mut seen = std::collections::HashSet::new();

    tables
        .iter()
        .filter(|t| t.description.to_uppercase().contains(&needle))
        .filter(|t| seen.insert(t.description.as_str()))
        .collect()
}

/// Fetch the catalog and search it.
pub fn find_tables(
    catalog: &dyn TableCatalog,
    keyword: &str,
) -> Result<Vec<TableInfo>, SourceError> {
    let tables = catalog.list_tables()?;
    Ok(search_tables(&tables, keyword).into_iter().cloned().collect())
}

/// One catalog line as `name | description`.
pub fn format_entry(table: &TableInfo) -> String {
    format!("{} | {}", table.name, table.description)
}
