//! zipstat CLI — run the pipeline, search the catalog, fetch single tables.
//!
//! Commands:
//! - `run` — fetch all source tables, build the master table and the ranked
//!   subsets, and persist them to the configured database
//! - `tables` — list ACS5 table groups whose description contains a keyword
//! - `fetch` — fetch one table and write it as `ACS5_<table_id>.csv`

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use zipstat_core::data::{find_tables, format_entry, CensusSource};
use zipstat_core::{TableSource, ZIP_CODE};
use zipstat_runner::{
    run_pipeline, save_report, save_source_table, MemorySink, OutputStatus, PipelineConfig,
    PipelineReport, SqlSink, TracingProgress,
};

#[derive(Parser)]
#[command(
    name = "zipstat",
    about = "zipstat — Census ACS5 zip code tables into a relational store"
)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline.
    Run {
        /// Path to a TOML config file. Defaults to the built-in ACS5 poverty run.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Census API key.
        #[arg(long, env = "CENSUS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Database password.
        #[arg(long, env = "ZIPSTAT_DB_PASSWORD", hide_env_values = true)]
        db_password: Option<String>,

        /// Full database URL; replaces host/port/database/user/password.
        #[arg(long, env = "ZIPSTAT_DATABASE_URL", hide_env_values = true)]
        database_url: Option<String>,

        /// Number of concurrent fetches.
        #[arg(long)]
        workers: Option<usize>,

        /// Export every fetched table as CSV into this directory.
        #[arg(long)]
        export_dir: Option<PathBuf>,

        /// Write the run report as JSON to this path.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Keep outputs in memory instead of writing to the database.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// List ACS5 tables whose description contains a keyword.
    Tables {
        /// Case-insensitive keyword, e.g. "poverty".
        keyword: String,

        /// Census API key.
        #[arg(long, env = "CENSUS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Path to a TOML config file (for year and base URL).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fetch a single table and write it as CSV.
    Fetch {
        /// Table id, e.g. B17018.
        table_id: String,

        /// Name for the value column.
        #[arg(long, default_value = "value")]
        column: String,

        /// Output directory.
        #[arg(long, default_value = ".")]
        output: PathBuf,

        /// Census API key.
        #[arg(long, env = "CENSUS_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Path to a TOML config file (for year and base URL).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            api_key,
            db_password,
            database_url,
            workers,
            export_dir,
            report,
            dry_run,
        } => {
            let mut pipeline_config = load_config(config.as_deref())?;
            pipeline_config.census.api_key = api_key.or(pipeline_config.census.api_key);
            pipeline_config.database.password = db_password.or(pipeline_config.database.password);
            pipeline_config.database.url = database_url.or(pipeline_config.database.url);
            if let Some(workers) = workers {
                pipeline_config.pipeline.fetch_workers = workers;
            }
            if export_dir.is_some() {
                pipeline_config.pipeline.export_dir = export_dir;
            }
            pipeline_config.validate()?;

            run_cmd(&pipeline_config, report.as_deref(), dry_run)
        }
        Commands::Tables {
            keyword,
            api_key,
            config,
        } => {
            let mut pipeline_config = load_config(config.as_deref())?;
            pipeline_config.census.api_key = api_key.or(pipeline_config.census.api_key);
            tables_cmd(&pipeline_config, &keyword)
        }
        Commands::Fetch {
            table_id,
            column,
            output,
            api_key,
            config,
        } => {
            let mut pipeline_config = load_config(config.as_deref())?;
            pipeline_config.census.api_key = api_key.or(pipeline_config.census.api_key);
            fetch_cmd(&pipeline_config, &table_id, &column, &output)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_file(path)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn run_cmd(config: &PipelineConfig, report_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let source = CensusSource::new(config.census_settings())?;

    let report = if dry_run {
        let sink = MemorySink::new();
        let report = run_pipeline(config, &source, &sink, &TracingProgress);
        for name in sink.table_names() {
            if let Some(frame) = sink.get(&name) {
                println!("{name}: {} rows", frame.height());
            }
        }
        report
    } else {
        let url = config.database.connection_url()?;
        tracing::info!(database = %config.database.display_url(), "connecting");
        let sink = SqlSink::connect_lazy(&url, config.database.acquire_timeout())?;
        run_pipeline(config, &source, &sink, &TracingProgress)
    };

    print_summary(&report);

    if let Some(path) = report_path {
        save_report(&report, path)?;
        println!("Report saved to: {}", path.display());
    }

    if !report.all_succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    println!("Run {}", report.config_fingerprint);
    for outcome in &report.outputs {
        match &outcome.status {
            OutputStatus::Persisted { rows, tie_overflow } if *tie_overflow > 0 => println!(
                "  OK   {}: {rows} rows ({tie_overflow} boundary ties)",
                outcome.output
            ),
            OutputStatus::Persisted { rows, .. } => {
                println!("  OK   {}: {rows} rows", outcome.output)
            }
            OutputStatus::Failed { stage, error } => {
                eprintln!("  FAIL {} at {stage}: {error}", outcome.output)
            }
        }
    }
    if !report.duplicates.is_empty() {
        println!(
            "  {} duplicate zip codes in the population table ({} extra rows)",
            report.duplicates.keys.len(),
            report.duplicates.extra_rows()
        );
    }
    for summary in &report.imputation {
        if summary.imputed_rows > 0 {
            println!(
                "  imputed {} {} values with {:.2}",
                summary.imputed_rows, summary.column, summary.fill_value
            );
        }
    }
}

fn tables_cmd(config: &PipelineConfig, keyword: &str) -> Result<()> {
    let source = CensusSource::new(config.census_settings())?;
    let matches = find_tables(&source, keyword)
        .with_context(|| format!("failed to search the table catalog for '{keyword}'"))?;

    if matches.is_empty() {
        println!("No tables match '{keyword}'");
    }
    for info in &matches {
        println!("{}", format_entry(info));
    }
    Ok(())
}

fn fetch_cmd(config: &PipelineConfig, table_id: &str, column: &str, output: &Path) -> Result<()> {
    let source = CensusSource::new(config.census_settings())?;
    let table = source
        .fetch(table_id, &[column, ZIP_CODE])
        .with_context(|| format!("failed to fetch {table_id}"))?;

    let path = save_source_table(&table, output)?;
    println!(
        "{table_id}: {} rows ({} missing) saved to {}",
        table.len(),
        table.missing_count(),
        path.display()
    );
    Ok(())
}
