//! Buildkite Pipeline Emitter
//!
//! Checks a compiled [`Pipeline`] for the graph rules Buildkite relies on
//! and serializes it to the YAML document uploaded by
//! `buildkite-agent pipeline upload`.

use crate::schema::{Pipeline, Step};
use kiteplan_core::{Error, Result};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// Path meaning "write to standard output".
pub const STDOUT_PATH: &str = "-";

/// Buildkite pipeline emitter
///
/// Keys produced outside this pipeline (for example an image build step
/// defined by an external step file) can be declared with
/// [`Self::with_external_key`] so dependencies on them validate.
#[derive(Debug, Clone, Default)]
pub struct BuildkiteEmitter {
    /// Keys that may be depended on without being emitted
    pub external_keys: Vec<String>,
}

impl BuildkiteEmitter {
    /// Create a new Buildkite emitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow dependencies on a key that is not part of the pipeline
    #[must_use]
    pub fn with_external_key(mut self, key: impl Into<String>) -> Self {
        self.external_keys.push(key.into());
        self
    }

    /// Validate the step graph.
    ///
    /// Keys must be unique, non-empty and free of whitespace, every `depends_on` must
    /// name an emitted or external key, and every command step runs either
    /// commands or plugins but not both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation.
    pub fn validate(&self, pipeline: &Pipeline) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for key in pipeline.keys() {
            if key.is_empty() {
                return Err(Error::config("step key must not be empty"));
            }
            if key.chars().any(char::is_whitespace) {
                return Err(Error::config(format!(
                    "step key '{key}' contains whitespace, which is not allowed in Buildkite keys"
                )));
            }
            if !seen.insert(key) {
                return Err(Error::config(format!("duplicate step key '{key}'")));
            }
        }

        for step in &pipeline.steps {
            if let Some(dependency) = step.depends_on()
                && !seen.contains(dependency)
                && !self.external_keys.iter().any(|k| k == dependency)
            {
                return Err(Error::config(format!(
                    "step '{}' depends on non-existent step '{dependency}'",
                    step.key()
                )));
            }

            if let Step::Command(command) = step {
                let has_commands = command.commands.as_ref().is_some_and(|c| !c.is_empty());
                let has_plugins = command.plugins.as_ref().is_some_and(|p| !p.is_empty());
                if has_commands == has_plugins {
                    return Err(Error::config(format!(
                        "step '{}' must define exactly one of commands or plugins",
                        command.key
                    )));
                }
            }
        }

        debug!(steps = pipeline.steps.len(), "Pipeline graph is valid");
        Ok(())
    }

    /// Validate and serialize the pipeline to YAML.
    ///
    /// # Errors
    ///
    /// Returns a validation error or [`Error::Serialization`].
    pub fn emit(&self, pipeline: &Pipeline) -> Result<String> {
        self.validate(pipeline)?;
        serde_yaml::to_string(pipeline).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Emit the pipeline to a file, or to stdout when `path` is `-`.
    ///
    /// Parent directories of the output file are created as needed.
    ///
    /// # Errors
    ///
    /// Returns an emit error or [`Error::Io`] if writing fails.
    pub fn write(&self, pipeline: &Pipeline, path: &Path) -> Result<()> {
        let yaml = self.emit(pipeline)?;

        if path.as_os_str() == STDOUT_PATH {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(yaml.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|e| Error::io(path, e))?;
            return Ok(());
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::write(path, yaml).map_err(|e| Error::io(path, e))?;
        info!(path = %path.display(), steps = pipeline.steps.len(), "Wrote pipeline");
        Ok(())
    }
}
