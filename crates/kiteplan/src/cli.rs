use crate::tracing::{LogLevel, TracingFormat};
use clap::Parser;
use kiteplan_core::config::{
    DEFAULT_CONTAINER_REGISTRY, DEFAULT_CONTAINER_REGISTRY_REPO, parse_run_all,
};
use miette::{Diagnostic, Report};
use std::io::{self, Write};
use std::path::PathBuf;
use thiserror::Error;

/// Exit codes for the CLI application
pub const EXIT_OK: i32 = 0;
/// CLI, configuration or step validation error exit code
pub const EXIT_CLI: i32 = 2;
/// I/O or other unexpected error exit code
pub const EXIT_OTHER: i32 = 3;

/// Test step definitions read by default.
pub const DEFAULT_TEST_PATH: &str = ".buildkite/test-pipeline.yaml";
/// External hardware steps, read only if present unless given explicitly.
pub const DEFAULT_EXTERNAL_HARDWARE_TEST_PATH: &str = ".buildkite/external-tests.yaml";
/// Pipeline written by default; `-` writes to stdout.
pub const DEFAULT_OUTPUT_PATH: &str = ".buildkite/pipeline.yaml";

/// CLI-specific error types with proper exit code mapping
#[derive(Error, Debug, Clone, Diagnostic)]
pub enum CliError {
    /// CLI, configuration or step validation error (exit code 2)
    #[error("CLI/configuration error: {message}")]
    #[diagnostic(code(kiteplan::cli::config))]
    Config {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
    /// I/O or other unexpected error (exit code 3)
    #[error("Unexpected error: {message}")]
    #[diagnostic(code(kiteplan::cli::other))]
    Other {
        /// The error message
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },
}

impl CliError {
    /// Create a new configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    /// Create a new other error
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            help: None,
        }
    }

    /// Create a new other error with help text
    #[must_use]
    pub fn other_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Convert `kiteplan_core::Error` to the matching `CliError` variant.
///
/// Invalid steps, configuration and queue tables exit with 2; missing
/// inputs, I/O and serialization failures exit with 3.
impl From<kiteplan_core::Error> for CliError {
    fn from(err: kiteplan_core::Error) -> Self {
        use kiteplan_core::Error;

        let message = err.to_string();
        match err {
            Error::Config { .. } => Self::config_with_help(
                message,
                "Fix the offending field in the test pipeline definition and re-run",
            ),
            Error::Yaml { .. } => Self::config_with_help(
                message,
                "Step files must be YAML documents with a top-level `steps:` list",
            ),
            Error::ConfigFile { .. } => Self::config(message),
            Error::UnresolvableQueue { .. } => Self::config_with_help(
                message,
                "Add the queue to the [queues] table of the configuration file",
            ),
            Error::InputNotFound { .. } => Self::other_with_help(
                message,
                "Check the --test-path / --external-hardware-test-path arguments",
            ),
            Error::Io { .. } => Self::other_with_help(
                message,
                "Check file permissions and ensure the path exists",
            ),
            Error::Serialization(_) => Self::other(message),
        }
    }
}

/// Map CLI error to appropriate exit code
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Other { .. } => EXIT_OTHER,
    }
}

/// Render an error on stderr through miette
pub fn render_error(err: &CliError) {
    let report = Report::new(err.clone());
    eprintln!("{report:?}");
    // Ensure output is flushed before the process exits
    let _ = io::stderr().flush();
}

/// Compile test step definitions into a Buildkite pipeline.
#[derive(Parser, Debug)]
#[command(name = "kiteplan")]
#[command(about = "Compile test step definitions into a Buildkite pipeline")]
#[command(long_about = None)]
#[command(version)]
pub struct Cli {
    /// Test step definitions.
    #[arg(long, env = "TEST_PATH", default_value = DEFAULT_TEST_PATH)]
    pub test_path: PathBuf,

    /// External hardware step definitions.
    ///
    /// Without this flag the default path is read only if it exists.
    #[arg(long)]
    pub external_hardware_test_path: Option<PathBuf>,

    /// Where to write the pipeline; `-` for stdout.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_PATH)]
    pub output: PathBuf,

    /// Run every step without gates (`1` or `true`).
    #[arg(
        long,
        env = "RUN_ALL",
        default_value = "0",
        num_args = 0..=1,
        default_missing_value = "1",
        value_parser = parse_run_all_flag,
        action = clap::ArgAction::Set
    )]
    pub run_all: bool,

    /// Changed files, separated by `|`.
    #[arg(long, env = "LIST_FILE_DIFF")]
    pub list_file_diff: Option<String>,

    /// Full commit hash the pipeline builds.
    #[arg(long, env = "BUILDKITE_COMMIT")]
    pub commit: String,

    /// Container registry the test image is pushed to.
    #[arg(long, default_value = DEFAULT_CONTAINER_REGISTRY)]
    pub registry: String,

    /// Repository of the test image in the registry.
    #[arg(long, default_value = DEFAULT_CONTAINER_REGISTRY_REPO)]
    pub repo: String,

    /// TOML file overriding the fleet defaults.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Logging verbosity level.
    #[arg(
        short = 'L',
        long,
        help = "Set logging level",
        default_value = "warn",
        value_enum
    )]
    pub level: LogLevel,

    /// Log output format.
    #[arg(long, default_value = "compact", value_enum)]
    pub format: TracingFormat,
}

#[allow(clippy::unnecessary_wraps)]
fn parse_run_all_flag(raw: &str) -> Result<bool, String> {
    Ok(parse_run_all(raw))
}

/// Parse command line arguments
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}
