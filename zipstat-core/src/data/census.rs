//! US Census Bureau ACS 5-year table source.
//!
//! Fetches a whole table group for every zip code tabulation area in one
//! request, keeps the `<table>_001E` estimate and the geography column, and
//! renames them to the caller's column names.
//!
//! The API answers with a JSON array of arrays: a header row followed by one
//! row per geography, every cell a string (or null).

use super::provider::{value_column_name, SourceError, TableCatalog, TableInfo, TableSource};
use super::table::{SourceTable, ZipRow};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Geography column returned for zip code tabulation area queries.
pub const ZCTA_COLUMN: &str = "zip code tabulation area";

/// ACS annotation values that stand in for a missing estimate.
const ANNOTATION_SENTINELS: [f64; 6] = [
    -666_666_666.0,
    -999_999_999.0,
    -888_888_888.0,
    -222_222_222.0,
    -333_333_333.0,
    -555_555_555.0,
];

/// Connection settings for [`CensusSource`].
#[derive(Debug, Clone)]
pub struct CensusSettings {
    /// Base data URL, e.g. `https://api.census.gov/data`.
    pub base_url: String,
    pub year: u16,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for CensusSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.census.gov/data".into(),
            year: 2017,
            api_key: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// `groups.json` catalog response.
#[derive(Debug, Deserialize)]
struct GroupsResponse {
    groups: Vec<GroupEntry>,
}

#[derive(Debug, Deserialize)]
struct GroupEntry {
    name: String,
    description: String,
}

/// Census ACS5 table source.
pub struct CensusSource {
    client: reqwest::blocking::Client,
    settings: CensusSettings,
}

impl CensusSource {
    pub fn new(settings: CensusSettings) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| {
                SourceError::SourceUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, settings })
    }

    fn dataset_url(&self) -> String {
        format!(
            "{}/{}/acs/acs5",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.year
        )
    }

    /// Query parameters for a whole-group, all-ZCTA request.
    fn table_query(&self, table_id: &str) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("get", format!("NAME,group({table_id})")),
            ("for", format!("{ZCTA_COLUMN}:*")),
        ];
        if let Some(key) = &self.settings.api_key {
            query.push(("key", key.clone()));
        }
        query
    }

    /// Send a GET and return the body of a successful response.
    fn get_body(
        &self,
        table_id: Option<&str>,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String, SourceError> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .map_err(|e| SourceError::SourceUnavailable(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| SourceError::SourceUnavailable(format!("failed to read body: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SourceError::SourceUnavailable(format!(
                "HTTP {status}: credential rejected"
            )));
        }

        if let Some(table_id) = table_id {
            if is_unknown_table_response(status, &body) {
                return Err(SourceError::UnknownTable {
                    table_id: table_id.to_string(),
                });
            }
        }

        Err(SourceError::SourceUnavailable(format!(
            "HTTP {status}: {}",
            body.trim()
        )))
    }
}

impl TableSource for CensusSource {
    fn name(&self) -> &str {
        "census_acs5"
    }

    fn fetch(&self, table_id: &str, output_columns: &[&str]) -> Result<SourceTable, SourceError> {
        let value_column = value_column_name(table_id, output_columns)?;
        let url = self.dataset_url();
        debug!(table_id, %url, "requesting census table");

        let body = self.get_body(Some(table_id), &url, &self.table_query(table_id))?;
        let rows = parse_table(table_id, &body)?;

        info!(table_id, rows = rows.len(), "fetched census table");
        Ok(SourceTable::new(table_id, value_column, rows))
    }
}

impl TableCatalog for CensusSource {
    fn list_tables(&self) -> Result<Vec<TableInfo>, SourceError> {
        let url = format!("{}/groups.json", self.dataset_url());
        let body = self.get_body(None, &url, &[])?;
        parse_groups(&body)
    }
}

/// Census reports a missing group as a 400/404 mentioning the unknown variable.
fn is_unknown_table_response(status: reqwest::StatusCode, body: &str) -> bool {
    let lowered = body.to_ascii_lowercase();
    (status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::NOT_FOUND)
        && (lowered.contains("unknown variable")
            || lowered.contains("unknown group")
            || lowered.contains("does not exist"))
}

/// Parse a table response into zip rows.
///
/// The estimate column is `<table_id>_001E`; its absence means the table
/// does not carry a simple single-column estimate.
pub fn parse_table(table_id: &str, body: &str) -> Result<Vec<ZipRow>, SourceError> {
    let mismatch = |detail: String| SourceError::SchemaMismatch {
        table_id: table_id.to_string(),
        detail,
    };

    let matrix: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)
        .map_err(|e| mismatch(format!("response is not a JSON table: {e}")))?;

    let mut rows_iter = matrix.into_iter();
    let header = rows_iter
        .next()
        .ok_or_else(|| mismatch("response has no header row".into()))?;

    let estimate = format!("{table_id}_001E");
    let find = |name: &str| header.iter().position(|h| h.as_str() == Some(name));
    let value_idx = find(estimate.as_str())
        .ok_or_else(|| mismatch(format!("column {estimate} absent")))?;
    let zip_idx =
        find(ZCTA_COLUMN).ok_or_else(|| mismatch(format!("column '{ZCTA_COLUMN}' absent")))?;

    let mut rows = Vec::new();
    for (line, record) in rows_iter.enumerate() {
        let zip = record
            .get(zip_idx)
            .and_then(cell_text)
            .ok_or_else(|| mismatch(format!("row {} has no zip code", line + 1)))?;
        let value = record
            .get(value_idx)
            .and_then(cell_text)
            .and_then(|v| parse_estimate(&v));
        rows.push(ZipRow::new(zip, value));
    }

    Ok(rows)
}

/// Cells are normally strings, but numbers are accepted too.
fn cell_text(cell: &serde_json::Value) -> Option<String> {
    match cell {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse one estimate cell; unparsable cells and annotation sentinels are missing.
pub fn parse_estimate(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() || ANNOTATION_SENTINELS.contains(&value) {
        return None;
    }
    Some(value)
}

/// Parse the `groups.json` catalog.
pub fn parse_groups(body: &str) -> Result<Vec<TableInfo>, SourceError> {
    let resp: GroupsResponse =
        serde_json::from_str(body).map_err(|e| SourceError::SchemaMismatch {
            table_id: "groups.json".into(),
            detail: e.to_string(),
        })?;

    Ok(resp
        .groups
        .into_iter()
        .map(|g| TableInfo {
            name: g.name,
            description: g.description,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const B01003_BODY: &str = r#"[
        ["NAME","B01003_001E","B01003_001M","GEO_ID","zip code tabulation area"],
        ["ZCTA5 00601","17242","256","8600000US00601","00601"],
        ["ZCTA5 00602","38442",null,"8600000US00602","00602"],
        ["ZCTA5 00603","-666666666","-222222222","8600000US00603","00603"]
    ]"#;

    #[test]
    fn parse_table_keeps_estimate_and_zip() {
        let rows = parse_table("B01003", B01003_BODY).unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], ZipRow::new("00601", Some(17242.0)));
        assert_eq!(rows[1].value, Some(38442.0));
        assert_eq!(rows[2].value, None, "annotation sentinel must parse as missing");
    }

    #[test]
    fn parse_table_reports_missing_estimate_column() {
        let err = parse_table("B17018", B01003_BODY).unwrap_err();
        match err {
            SourceError::SchemaMismatch { table_id, detail } => {
                assert_eq!(table_id, "B17018");
                assert!(detail.contains("B17018_001E"));
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn parse_table_rejects_non_json() {
        let err = parse_table("B01003", "<html>Invalid Key</html>").unwrap_err();
        assert!(matches!(err, SourceError::SchemaMismatch { .. }));
    }

    #[test]
    fn parse_estimate_handles_garbage() {
        assert_eq!(parse_estimate(" 12.5 "), Some(12.5));
        assert_eq!(parse_estimate("N"), None);
        assert_eq!(parse_estimate("-999999999"), None);
        assert_eq!(parse_estimate("-3"), Some(-3.0));
    }

    #[test]
    fn parse_groups_reads_catalog() {
        let body = r#"{"groups":[
            {"name":"B17018","description":"POVERTY STATUS IN THE PAST 12 MONTHS OF FAMILIES","variables":"x"},
            {"name":"B01003","description":"TOTAL POPULATION","variables":"y"}
        ]}"#;
        let tables = parse_groups(body).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].name, "B01003");
    }

    #[test]
    fn unknown_table_detection() {
        assert!(is_unknown_table_response(
            reqwest::StatusCode::BAD_REQUEST,
            "error: unknown variable 'group(B99999)'"
        ));
        assert!(!is_unknown_table_response(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "unknown variable"
        ));
    }

    #[test]
    fn table_query_includes_key_when_configured() {
        let source = CensusSource::new(CensusSettings {
            api_key: Some("secret".into()),
            ..CensusSettings::default()
        })
        .unwrap();

        let query = source.table_query("B01003");
        assert!(query.contains(&("get", "NAME,group(B01003)".to_string())));
        assert!(query.contains(&("key", "secret".to_string())));
        assert_eq!(source.dataset_url(), "https://api.census.gov/data/2017/acs/acs5");
    }
}
