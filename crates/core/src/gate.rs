//! Manual approval gating.
//!
//! A step runs automatically unless it is optional or none of its source
//! file dependencies were touched. Dependencies match changed files by
//! plain substring containment, so `api` matches `mapit/core.py`.

use crate::step::TestStep;
use tracing::debug;

/// Decide whether `step` runs without manual approval.
#[must_use]
pub fn should_run_automatically(step: &TestStep, run_all: bool, changed_files: &[String]) -> bool {
    if step.optional {
        debug!(step = %step.label, "Optional step requires approval");
        return false;
    }
    let Some(dependencies) = step.source_file_dependencies.as_deref() else {
        return true;
    };
    if run_all || dependencies.is_empty() {
        return true;
    }
    let matched = dependencies
        .iter()
        .find(|dep| changed_files.iter().any(|file| file.contains(dep.as_str())));
    debug!(
        step = %step.label,
        matched = ?matched,
        "Evaluated source file dependencies"
    );
    matched.is_some()
}
