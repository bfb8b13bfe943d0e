//! Step file loading.

use crate::error::{Error, Result};
use crate::step::{RawTestStep, TestStep};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct StepFile {
    steps: Vec<RawTestStep>,
}

/// Parse a `{ steps: [...] }` document into validated test steps.
///
/// Validation is all-or-nothing: the first invalid step aborts parsing.
///
/// # Errors
///
/// Returns [`Error::Yaml`] for malformed documents and [`Error::Config`]
/// for steps that break a step invariant.
pub fn parse_test_steps(source: &str, path: &Path) -> Result<Vec<TestStep>> {
    let file: StepFile = serde_yaml::from_str(source).map_err(|e| Error::Yaml {
        path: path.to_path_buf(),
        source: e,
    })?;
    file.steps.into_iter().map(TestStep::from_raw).collect()
}

/// Read and validate the test steps in `path`.
///
/// # Errors
///
/// Returns [`Error::InputNotFound`] if the file does not exist, otherwise
/// see [`parse_test_steps`].
pub fn read_test_steps(path: &Path) -> Result<Vec<TestStep>> {
    if !path.exists() {
        return Err(Error::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let steps = parse_test_steps(&source, path)?;
    debug!(path = %path.display(), count = steps.len(), "Read test steps");
    Ok(steps)
}
