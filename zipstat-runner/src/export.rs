//! File exports — raw source tables as CSV and run reports as JSON.
//!
//! Every fetched table can be written to `ACS5_<table_id>.csv` for offline
//! inspection. The run report round-trips through JSON with a schema version;
//! unknown versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use zipstat_core::{SourceTable, ZIP_CODE};

use crate::pipeline::{PipelineReport, REPORT_SCHEMA_VERSION};

// ─── CSV export ─────────────────────────────────────────────────────

/// File name for an exported source table.
pub fn source_file_name(table_id: &str) -> String {
    format!("ACS5_{table_id}.csv")
}

/// Export a source table as CSV.
///
/// Columns: the table's value column, then zip_code. Missing values are
/// written as empty cells.
pub fn export_table_csv(table: &SourceTable) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([table.value_column.as_str(), ZIP_CODE])?;

    for row in &table.rows {
        let value = row.value.map(format_value).unwrap_or_default();
        wtr.write_record([value.as_str(), row.zip_code.as_str()])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Write `ACS5_<table_id>.csv` under `dir`, creating it if needed.
///
/// Returns the path of the written file.
pub fn save_source_table(table: &SourceTable, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create export dir: {}", dir.display()))?;

    let path = dir.join(source_file_name(&table.table_id));
    let csv = export_table_csv(table)?;
    std::fs::write(&path, csv).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Whole estimates print without a trailing `.0`.
fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

// ─── Report JSON ────────────────────────────────────────────────────

pub fn export_report_json(report: &PipelineReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize PipelineReport to JSON")
}

/// Deserialize a `PipelineReport`, rejecting unknown schema versions.
pub fn import_report_json(json: &str) -> Result<PipelineReport> {
    let report: PipelineReport =
        serde_json::from_str(json).context("failed to deserialize PipelineReport from JSON")?;
    if report.schema_version > REPORT_SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            REPORT_SCHEMA_VERSION
        );
    }
    Ok(report)
}

pub fn save_report(report: &PipelineReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create report dir: {}", parent.display()))?;
    }
    let json = export_report_json(report)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

pub fn load_report(path: &Path) -> Result<PipelineReport> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_report_json(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zipstat_core::ZipRow;

    fn sample_table() -> SourceTable {
        SourceTable::new(
            "B17018",
            "poverty_status",
            vec![
                ZipRow::new("00601", Some(12.0)),
                ZipRow::new("00602", None),
                ZipRow::new("00603", Some(0.25)),
            ],
        )
    }

    #[test]
    fn csv_has_value_then_zip_with_empty_missing_cells() {
        let csv = export_table_csv(&sample_table()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines[0], "poverty_status,zip_code");
        assert_eq!(lines[1], "12,00601");
        assert_eq!(lines[2], ",00602");
        assert_eq!(lines[3], "0.25,00603");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn empty_table_exports_header_only() {
        let table = SourceTable::new("B05010", "income_poverty_ratio", vec![]);
        let csv = export_table_csv(&table).unwrap();
        assert_eq!(csv.trim_end(), "income_poverty_ratio,zip_code");
    }

    #[test]
    fn save_source_table_uses_acs5_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("raw");

        let path = save_source_table(&sample_table(), &nested).unwrap();

        assert_eq!(path, nested.join("ACS5_B17018.csv"));
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("poverty_status,zip_code"));
    }

    #[test]
    fn report_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let report = PipelineReport::empty("abc123");

        save_report(&report, &path).unwrap();
        let loaded = load_report(&path).unwrap();

        assert_eq!(loaded.config_fingerprint, "abc123");
        assert_eq!(loaded.schema_version, REPORT_SCHEMA_VERSION);
    }

    #[test]
    fn future_schema_version_is_rejected() {
        let mut report = PipelineReport::empty("abc123");
        report.schema_version = REPORT_SCHEMA_VERSION + 1;
        let json = serde_json::to_string(&report).unwrap();

        let err = import_report_json(&json).unwrap_err();
        assert!(err.to_string().contains("unsupported schema version"));
    }
}
