//! # lens-cli
//!
//! The `incident-lens` command-line interface.
//!
//! ```text
//! incident-lens <ARCHIVE_DIR> [--start T] [--end T] [--max-events N]
//!               [--format json|summary] [--output FILE]
//! ```
//!
//! The binary discovers inputs in the archive directory, runs the
//! `lens-analyze` pipeline and prints the report. Logs go to stderr so that
//! stdout carries only the report.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod discovery;
pub mod error;
pub mod output;

pub use cli::{Cli, Format};
pub use discovery::{InputKind, discover, input_kind};
pub use error::CliError;
pub use output::OutputFormat;
