//! `incident-lens` binary entrypoint.

use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lens_analyze::Pipeline;
use lens_cli::{Cli, OutputFormat, discover};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.pipeline_config()?;
    let inputs = discover(&cli.archive)
        .with_context(|| format!("reading archive {}", cli.archive.display()))?;
    if inputs.is_empty() {
        warn!(archive = %cli.archive.display(), "no recognized input files");
    }
    info!(
        archive = %cli.archive.display(),
        files = inputs.file_count(),
        max_events = config.max_events,
        "starting analysis"
    );

    let report = Pipeline::new(config).run(&inputs).await;

    OutputFormat::new(cli.format)
        .emit(&report, cli.output.as_deref())
        .with_context(|| match &cli.output {
            Some(path) => format!("writing report to {}", path.display()),
            None => "writing report to stdout".to_string(),
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_fails_for_missing_archive() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let cli = Cli::parse_from(["incident-lens", missing.to_str().unwrap()]);
        let err = run(cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("archive directory not found"));
    }

    #[tokio::test]
    async fn run_writes_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let cli = Cli::parse_from([
            "incident-lens",
            dir.path().to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ]);
        run(cli).await.unwrap();
        assert!(std::fs::read_to_string(&out).unwrap().contains("\"issues\""));
    }
}
