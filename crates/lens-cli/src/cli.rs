//! Command-line argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use lens_analyze::PipelineConfig;
use lens_ingest::{MAX_EVENTS, TimeRange, parse_bound};

use crate::error::CliError;

/// Analyze an incident log archive and report correlated issues.
#[derive(Parser, Debug, Clone)]
#[command(name = "incident-lens")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Archive directory containing error logs, metrics snapshots and dumps.
    pub archive: PathBuf,

    /// Maximum number of events kept in the report.
    #[arg(long, env = "INCIDENT_LENS_MAX_EVENTS", default_value_t = MAX_EVENTS)]
    pub max_events: usize,

    /// Only analyze records at or after this ISO-8601 time.
    #[arg(long)]
    pub start: Option<String>,

    /// Only analyze records at or before this ISO-8601 time.
    #[arg(long)]
    pub end: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Json)]
    pub format: Format,

    /// Write the report to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Pretty-printed JSON report.
    #[default]
    Json,
    /// Human-readable text summary.
    Summary,
}

impl Cli {
    /// Builds the time filter from `--start` and `--end`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::InvalidArgument`] for an unparseable bound or a
    /// start that lies after the end.
    pub fn time_range(&self) -> Result<TimeRange, CliError> {
        let bound = |value: Option<&str>, flag: &str| {
            value
                .map(parse_bound)
                .transpose()
                .map_err(|e| CliError::InvalidArgument(format!("--{flag}: {e}")))
        };
        let start = bound(self.start.as_deref(), "start")?;
        let end = bound(self.end.as_deref(), "end")?;
        TimeRange::new(start, end).map_err(|e| CliError::InvalidArgument(e.to_string()))
    }

    /// Builds the pipeline configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the time bounds are invalid or the event cap is zero.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, CliError> {
        if self.max_events == 0 {
            return Err(CliError::InvalidArgument(
                "--max-events must be greater than zero".to_string(),
            ));
        }
        Ok(PipelineConfig::default()
            .with_max_events(self.max_events)
            .with_time_range(self.time_range()?))
    }
}
