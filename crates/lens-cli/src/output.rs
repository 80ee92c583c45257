//! Report output.
//!
//! Supports pretty JSON (the default, for scripting) and a text summary.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use lens_analyze::{AnalysisReport, format_summary};

use crate::cli::Format;
use crate::error::{CliError, Result};

/// Output formatter for analysis reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a report to a writer.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W: Write>(&self, writer: &mut W, report: &AnalysisReport) -> Result<()> {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, report)?;
                writeln!(writer)?;
            }
            Format::Summary => {
                writer.write_all(format_summary(report).as_bytes())?;
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Render a report to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string(&self, report: &AnalysisReport) -> Result<String> {
        let mut buf = Vec::new();
        self.write(&mut buf, report)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }

    /// Write a report to `path`, or to stdout when no path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or writing fails.
    pub fn emit(&self, report: &AnalysisReport, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                let mut file = BufWriter::new(File::create(path)?);
                self.write(&mut file, report)
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                self.write(&mut stdout, report)
            }
        }
    }
}
