//! zipstat runner — configuration, persistence, export, and orchestration.
//!
//! This crate builds on `zipstat-core` to provide:
//! - TOML pipeline configuration with secret-free fingerprints
//! - Relational sinks (sqlx-backed SQL, in-memory)
//! - CSV export of fetched source tables and JSON run reports
//! - The pipeline orchestrator with per-output failure isolation

pub mod config;
pub mod export;
pub mod pipeline;
pub mod sink;

pub use config::{
    ConfigError, ConfigFingerprint, IndicatorSpec, MasterSpec, PipelineConfig, SourceRequest,
};
pub use export::{load_report, save_report, save_source_table};
pub use pipeline::{
    run_pipeline, FetchOutcome, OutputOutcome, OutputStatus, PipelineError, PipelineProgress,
    PipelineReport, Stage, TracingProgress,
};
pub use sink::{MemorySink, RelationalSink, SinkError, SqlSink};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_is_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
    }

    #[test]
    fn report_is_send_sync() {
        assert_send::<PipelineReport>();
        assert_sync::<PipelineReport>();
    }

    #[test]
    fn sinks_are_send_sync() {
        assert_send::<SqlSink>();
        assert_sync::<SqlSink>();
        assert_send::<MemorySink>();
        assert_sync::<MemorySink>();
    }

    #[test]
    fn tracing_progress_is_send_sync() {
        assert_send::<TracingProgress>();
        assert_sync::<TracingProgress>();
    }
}
