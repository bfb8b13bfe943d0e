//! Error types for pipeline generation.

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for kiteplan operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading steps or compiling a pipeline.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A test step or run configuration violates one of its rules.
    #[error("{}", render_config(message, step.as_deref()))]
    #[diagnostic(
        code(kiteplan::config),
        help("Fix the offending field in the test pipeline definition and re-run")
    )]
    Config {
        /// What rule was violated
        message: String,
        /// Label of the offending step, when the error is step-scoped
        step: Option<String>,
    },

    /// A declared step source file does not exist.
    #[error("Input file not found: {}", path.display())]
    #[diagnostic(
        code(kiteplan::input_not_found),
        help("Check the --test-path / --external-hardware-test-path arguments")
    )]
    InputNotFound {
        /// The missing path
        path: PathBuf,
    },

    /// A queue could not be mapped to an agent queue name.
    #[error("No agent queue configured for '{queue}'")]
    #[diagnostic(
        code(kiteplan::unresolvable_queue),
        help("Add the queue to the [queues] table of the configuration file")
    )]
    UnresolvableQueue {
        /// The queue identifier that has no name
        queue: String,
    },

    /// Reading or writing a file failed.
    #[error("I/O error on {}: {source}", path.display())]
    #[diagnostic(code(kiteplan::io))]
    Io {
        /// The path being accessed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// A step document is not valid YAML or does not match the step schema.
    #[error("Failed to parse {}: {source}", path.display())]
    #[diagnostic(
        code(kiteplan::yaml),
        help("Step files must be YAML documents with a top-level `steps:` list")
    )]
    Yaml {
        /// The document being parsed
        path: PathBuf,
        /// The underlying parse error
        #[source]
        source: serde_yaml::Error,
    },

    /// The TOML defaults file is malformed.
    #[error("Invalid configuration file {}: {source}", path.display())]
    #[diagnostic(code(kiteplan::config_file))]
    ConfigFile {
        /// The configuration file path
        path: PathBuf,
        /// The underlying parse error
        #[source]
        source: toml::de::Error,
    },

    /// Emitting the pipeline document failed.
    #[error("Serialization failed: {0}")]
    #[diagnostic(code(kiteplan::serialization))]
    Serialization(String),
}

fn render_config(message: &str, step: Option<&str>) -> String {
    match step {
        Some(label) => format!("Invalid test step '{label}': {message}"),
        None => format!("Configuration error: {message}"),
    }
}

impl Error {
    /// Create a configuration error that is not tied to a step.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            step: None,
        }
    }

    /// Create a configuration error for the step with the given label.
    #[must_use]
    pub fn step(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            step: Some(label.into()),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether the error stems from invalid configuration rather than the environment.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::ConfigFile { .. }
                | Self::Yaml { .. }
                | Self::UnresolvableQueue { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_names_label() {
        let err = Error::step("Basic Correctness", "'gpu' and 'no_gpu' cannot be defined together");
        assert_eq!(
            err.to_string(),
            "Invalid test step 'Basic Correctness': 'gpu' and 'no_gpu' cannot be defined together"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_config_error_without_step() {
        let err = Error::config("commit 'abc' is not a valid git commit hash");
        assert_eq!(
            err.to_string(),
            "Configuration error: commit 'abc' is not a valid git commit hash"
        );
    }

    #[test]
    fn test_input_not_found_is_not_config() {
        let err = Error::InputNotFound {
            path: PathBuf::from(".buildkite/test-pipeline.yaml"),
        };
        assert!(err.to_string().contains(".buildkite/test-pipeline.yaml"));
        assert!(!err.is_config());
    }
}
