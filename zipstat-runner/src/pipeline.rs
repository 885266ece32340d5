//! Pipeline orchestrator — fetch, build, select, persist.
//!
//! Every distinct source table is fetched once. The master table and each
//! ranked subset then run as independent output pipelines: a failure is
//! recorded against its output and the remaining outputs still complete.
//! Nothing is retried.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use zipstat_core::master::ImputationSummary;
use zipstat_core::{
    select_top_k, DuplicateReport, MasterBuilder, SelectError, SourceError, SourceTable,
    TableSource, ZIP_CODE,
};

use crate::config::{
    ConfigFingerprint, IndicatorSpec, PipelineConfig, SourceRequest, HOUSING_COLUMN,
    POPULATION_COLUMN,
};
use crate::export::save_source_table;
use crate::sink::{RelationalSink, SinkError};

/// Current run report schema version.
pub const REPORT_SCHEMA_VERSION: u32 = 1;

// ─── Errors ─────────────────────────────────────────────────────────

/// The stage at which an output pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Build,
    Select,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch => write!(f, "fetch"),
            Self::Build => write!(f, "build"),
            Self::Select => write!(f, "select"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum PipelineError {
    #[error("fetch of {table_id} failed: {error}")]
    Fetch { table_id: String, error: SourceError },

    #[error("master build failed: {0}")]
    Build(String),

    #[error("selection on {table_id} failed: {detail}")]
    Select { table_id: String, detail: String },

    #[error("persist failed: {0}")]
    Persist(#[from] SinkError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch { .. } => Stage::Fetch,
            Self::Build(_) => Stage::Build,
            Self::Select { .. } => Stage::Select,
            Self::Persist(_) => Stage::Persist,
        }
    }

    fn select(table_id: &str, e: SelectError) -> Self {
        Self::Select {
            table_id: table_id.to_string(),
            detail: e.to_string(),
        }
    }
}

// ─── Report ─────────────────────────────────────────────────────────

/// Result of fetching one source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchOutcome {
    pub table_id: String,
    pub value_column: String,
    pub rows: usize,
    pub missing_values: usize,
    pub error: Option<SourceError>,
    /// Set when the raw table was exported to CSV.
    pub export_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputStatus {
    Persisted { rows: usize, tie_overflow: usize },
    Failed { stage: Stage, error: PipelineError },
}

/// Result of one output pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputOutcome {
    /// Relation name.
    pub output: String,
    pub source_tables: Vec<String>,
    pub status: OutputStatus,
}

impl OutputOutcome {
    fn from_result(
        output: &str,
        source_tables: Vec<String>,
        result: Result<(usize, usize), PipelineError>,
    ) -> Self {
        let status = match result {
            Ok((rows, tie_overflow)) => OutputStatus::Persisted { rows, tie_overflow },
            Err(error) => OutputStatus::Failed {
                stage: error.stage(),
                error,
            },
        };
        Self {
            output: output.to_string(),
            source_tables,
            status,
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self.status, OutputStatus::Persisted { .. })
    }
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub schema_version: u32,
    pub config_fingerprint: ConfigFingerprint,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// In fetch order.
    pub fetches: Vec<FetchOutcome>,
    /// In configuration order, master first.
    pub outputs: Vec<OutputOutcome>,
    pub duplicates: DuplicateReport,
    pub imputation: Vec<ImputationSummary>,
}

impl PipelineReport {
    pub fn empty(config_fingerprint: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            config_fingerprint: config_fingerprint.into(),
            started_at: now,
            finished_at: now,
            fetches: Vec::new(),
            outputs: Vec::new(),
            duplicates: DuplicateReport::default(),
            imputation: Vec::new(),
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.outputs.iter().all(OutputOutcome::is_persisted)
    }

    pub fn failed_outputs(&self) -> Vec<&OutputOutcome> {
        self.outputs.iter().filter(|o| !o.is_persisted()).collect()
    }

    pub fn persisted_count(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_persisted()).count()
    }

    pub fn outcome(&self, output: &str) -> Option<&OutputOutcome> {
        self.outputs.iter().find(|o| o.output == output)
    }
}

// ─── Progress ───────────────────────────────────────────────────────

/// Observer for pipeline events.
pub trait PipelineProgress: Send + Sync {
    /// Called when a source fetch starts.
    fn on_fetch_start(&self, table_id: &str, index: usize, total: usize);

    /// Called when a source fetch completes.
    fn on_fetch_complete(
        &self,
        table_id: &str,
        index: usize,
        total: usize,
        result: &Result<SourceTable, SourceError>,
    );

    /// Called when an output pipeline finishes, successfully or not.
    fn on_output_complete(&self, outcome: &OutputOutcome);

    /// Called once with the finished report.
    fn on_run_complete(&self, report: &PipelineReport);
}

/// Logs pipeline events through `tracing`.
pub struct TracingProgress;

impl PipelineProgress for TracingProgress {
    fn on_fetch_start(&self, table_id: &str, index: usize, total: usize) {
        info!("[{}/{}] fetching {table_id}", index + 1, total);
    }

    fn on_fetch_complete(
        &self,
        table_id: &str,
        _index: usize,
        _total: usize,
        result: &Result<SourceTable, SourceError>,
    ) {
        match result {
            Ok(table) => info!(
                table_id,
                rows = table.len(),
                missing = table.missing_count(),
                "fetched"
            ),
            Err(e) => error!(table_id, error = %e, "fetch failed"),
        }
    }

    fn on_output_complete(&self, outcome: &OutputOutcome) {
        match &outcome.status {
            OutputStatus::Persisted { rows, tie_overflow } => info!(
                output = %outcome.output,
                rows,
                tie_overflow,
                "output persisted"
            ),
            OutputStatus::Failed { stage, error } => error!(
                output = %outcome.output,
                %stage,
                error = %error,
                "output failed"
            ),
        }
    }

    fn on_run_complete(&self, report: &PipelineReport) {
        info!(
            fingerprint = %report.config_fingerprint,
            persisted = report.persisted_count(),
            failed = report.failed_outputs().len(),
            "run complete"
        );
    }
}

// ─── Orchestration ──────────────────────────────────────────────────

type Fetched = (SourceRequest, Result<SourceTable, SourceError>);

/// Run the full pipeline against `source` and `sink`.
///
/// Never fails as a whole; per-output failures are recorded in the report.
/// `config` is expected to have passed [`PipelineConfig::validate`].
pub fn run_pipeline(
    config: &PipelineConfig,
    source: &dyn TableSource,
    sink: &dyn RelationalSink,
    progress: &dyn PipelineProgress,
) -> PipelineReport {
    let mut report = PipelineReport::empty(config.fingerprint());
    info!(
        fingerprint = %report.config_fingerprint,
        source = source.name(),
        sink = sink.name(),
        outputs = config.output_names().len(),
        "pipeline starting"
    );

    let fetched = fetch_all(config, source, progress);
    report.fetches = fetched
        .iter()
        .map(|(request, result)| fetch_outcome(config, request, result))
        .collect();

    let master = run_master(config, &fetched, sink, &mut report);
    progress.on_output_complete(&master);
    report.outputs.push(master);

    for spec in &config.indicators {
        let outcome = run_indicator(spec, &fetched, sink);
        progress.on_output_complete(&outcome);
        report.outputs.push(outcome);
    }

    report.finished_at = Utc::now();
    progress.on_run_complete(&report);
    report
}

/// Fetch every distinct source table, in request order.
///
/// With `fetch_workers > 1` the fetches run on a dedicated rayon pool; the
/// results keep request order either way.
fn fetch_all(
    config: &PipelineConfig,
    source: &dyn TableSource,
    progress: &dyn PipelineProgress,
) -> Vec<Fetched> {
    let requests = config.source_requests();
    let total = requests.len();

    let fetch_one = |(index, request): (usize, SourceRequest)| -> Fetched {
        progress.on_fetch_start(&request.table_id, index, total);
        let result = source.fetch(
            &request.table_id,
            &[request.value_column.as_str(), ZIP_CODE],
        );
        progress.on_fetch_complete(&request.table_id, index, total, &result);
        (request, result)
    };

    let workers = config.pipeline.fetch_workers.min(total);
    let thread_pool = if workers > 1 {
        match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!(error = %e, "failed to build fetch pool, fetching sequentially");
                None
            }
        }
    } else {
        None
    };

    match thread_pool {
        Some(pool) => {
            debug!(workers, "fetching on worker pool");
            pool.install(|| {
                requests
                    .into_par_iter()
                    .enumerate()
                    .map(fetch_one)
                    .collect()
            })
        }
        None => requests.into_iter().enumerate().map(fetch_one).collect(),
    }
}

fn fetch_outcome(
    config: &PipelineConfig,
    request: &SourceRequest,
    result: &Result<SourceTable, SourceError>,
) -> FetchOutcome {
    let mut outcome = FetchOutcome {
        table_id: request.table_id.clone(),
        value_column: request.value_column.clone(),
        rows: 0,
        missing_values: 0,
        error: None,
        export_path: None,
    };

    match result {
        Ok(table) => {
            outcome.rows = table.len();
            outcome.missing_values = table.missing_count();
            if let Some(dir) = &config.pipeline.export_dir {
                match save_source_table(table, dir) {
                    Ok(path) => outcome.export_path = Some(path),
                    Err(e) => warn!(table_id = %request.table_id, error = %e, "export failed"),
                }
            }
        }
        Err(e) => outcome.error = Some(e.clone()),
    }

    outcome
}

fn lookup<'a>(
    fetched: &'a [Fetched],
    table_id: &str,
    value_column: &str,
) -> Result<&'a SourceTable, PipelineError> {
    let fetch_error = |error: SourceError| PipelineError::Fetch {
        table_id: table_id.to_string(),
        error,
    };

    match fetched
        .iter()
        .find(|(r, _)| r.table_id == table_id && r.value_column == value_column)
    {
        Some((_, Ok(table))) => Ok(table),
        Some((_, Err(e))) => Err(fetch_error(e.clone())),
        None => Err(fetch_error(SourceError::SourceUnavailable(format!(
            "{table_id} was not fetched"
        )))),
    }
}

/// Master output: both inputs must have been fetched.
fn run_master(
    config: &PipelineConfig,
    fetched: &[Fetched],
    sink: &dyn RelationalSink,
    report: &mut PipelineReport,
) -> OutputOutcome {
    let spec = &config.master;
    let result = build_master(config, fetched, sink, report).map(|rows| (rows, 0));

    OutputOutcome::from_result(
        &spec.output,
        vec![spec.population_table.clone(), spec.housing_table.clone()],
        result,
    )
}

/// Build the master table and persist it: fetch lookup → build → persist.
fn build_master(
    config: &PipelineConfig,
    fetched: &[Fetched],
    sink: &dyn RelationalSink,
    report: &mut PipelineReport,
) -> Result<usize, PipelineError> {
    let spec = &config.master;
    let population = lookup(fetched, &spec.population_table, POPULATION_COLUMN)?;
    let housing = lookup(fetched, &spec.housing_table, HOUSING_COLUMN)?;

    let master = MasterBuilder::build(population, housing)
        .map_err(|e| PipelineError::Build(e.to_string()))?;
    report.duplicates = master.duplicates.clone();
    report.imputation = master.imputation.clone();

    Ok(sink.persist(&master.frame, &spec.output)?)
}

fn run_indicator(
    spec: &IndicatorSpec,
    fetched: &[Fetched],
    sink: &dyn RelationalSink,
) -> OutputOutcome {
    let result = select_indicator(spec, fetched, sink);
    OutputOutcome::from_result(&spec.output, vec![spec.table_id.clone()], result)
}

/// Rank one indicator table and persist the subset: lookup → select → persist.
///
/// Returns the rows written and the tie overflow beyond k.
fn select_indicator(
    spec: &IndicatorSpec,
    fetched: &[Fetched],
    sink: &dyn RelationalSink,
) -> Result<(usize, usize), PipelineError> {
    let table = lookup(fetched, &spec.table_id, &spec.value_column)?;
    let subset = select_top_k(table, spec.k, spec.direction)
        .map_err(|e| PipelineError::select(&spec.table_id, e))?;
    let rows = sink.persist(&subset.frame, &spec.output)?;
    Ok((rows, subset.tie_overflow()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_know_their_stage() {
        let fetch = PipelineError::Fetch {
            table_id: "B17018".into(),
            error: SourceError::SourceUnavailable("timeout".into()),
        };
        assert_eq!(fetch.stage(), Stage::Fetch);
        assert_eq!(PipelineError::Build("x".into()).stage(), Stage::Build);
        assert_eq!(
            PipelineError::select("B05010", SelectError::InvalidK { k: 0 }).stage(),
            Stage::Select
        );
        assert_eq!(
            PipelineError::from(SinkError::ConnectionError("refused".into())).stage(),
            Stage::Persist
        );
    }

    #[test]
    fn empty_report_has_no_failures() {
        let report = PipelineReport::empty("f");
        assert!(report.all_succeeded());
        assert_eq!(report.persisted_count(), 0);
    }

    #[test]
    fn failed_output_is_reported_with_stage() {
        let mut report = PipelineReport::empty("f");
        report.outputs.push(OutputOutcome::from_result(
            "tblA",
            vec!["B17018".into()],
            Ok((10, 0)),
        ));
        report.outputs.push(OutputOutcome::from_result(
            "tblB",
            vec!["B05010".into()],
            Err(PipelineError::select(
                "B05010",
                SelectError::EmptyTable {
                    table_id: "B05010".into(),
                },
            )),
        ));

        assert!(!report.all_succeeded());
        let failed = report.failed_outputs();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].output, "tblB");
        assert!(matches!(
            failed[0].status,
            OutputStatus::Failed {
                stage: Stage::Select,
                ..
            }
        ));
    }

    #[test]
    fn report_status_serializes_with_tag() {
        let outcome = OutputOutcome::from_result("tblA", vec![], Ok((11, 1)));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"]["status"], "persisted");
        assert_eq!(json["status"]["tie_overflow"], 1);
    }

    #[test]
    fn lookup_distinguishes_missing_and_failed() {
        let ok = SourceTable::new("B17018", "poverty_status", vec![]);
        let fetched: Vec<Fetched> = vec![
            (SourceRequest::new("B17018", "poverty_status"), Ok(ok)),
            (
                SourceRequest::new("B17004", "poverty_status"),
                Err(SourceError::UnknownTable {
                    table_id: "B17004".into(),
                }),
            ),
        ];

        assert!(lookup(&fetched, "B17018", "poverty_status").is_ok());
        assert!(matches!(
            lookup(&fetched, "B17004", "poverty_status"),
            Err(PipelineError::Fetch {
                error: SourceError::UnknownTable { .. },
                ..
            })
        ));
        assert!(lookup(&fetched, "B17018", "other").is_err());
    }
}
