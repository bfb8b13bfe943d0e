use crate::cli::{Cli, DEFAULT_EXTERNAL_HARDWARE_TEST_PATH};
use kiteplan_buildkite::{BuildkiteEmitter, Pipeline, PipelineGenerator};
use kiteplan_core::config::parse_file_diff;
use kiteplan_core::loader::read_test_steps;
use kiteplan_core::{Defaults, PlanConfig, Result, TestStep};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Run configuration described by the command line.
///
/// # Errors
///
/// Returns a configuration error when the commit is not a full hash.
pub fn plan_config(cli: &Cli) -> Result<PlanConfig> {
    PlanConfig::new(
        &cli.registry,
        &cli.repo,
        &cli.commit,
        cli.run_all,
        cli.list_file_diff
            .as_deref()
            .map(parse_file_diff)
            .unwrap_or_default(),
    )
}

/// Fleet defaults, overridden by the `--config` file when given.
///
/// # Errors
///
/// Returns an error if the configuration file is missing or malformed.
pub fn load_defaults(path: Option<&Path>) -> Result<Defaults> {
    path.map_or_else(|| Ok(Defaults::default()), Defaults::load)
}

/// External hardware steps.
///
/// An explicit path must exist; the default path is optional.
///
/// # Errors
///
/// Returns [`kiteplan_core::Error::InputNotFound`] for a missing explicit
/// path, or any error from parsing the step file.
pub fn load_external_steps(path: Option<&Path>) -> Result<Vec<TestStep>> {
    if let Some(path) = path {
        return read_test_steps(path);
    }
    let default = Path::new(DEFAULT_EXTERNAL_HARDWARE_TEST_PATH);
    if default.exists() {
        read_test_steps(default)
    } else {
        debug!(path = %default.display(), "No external hardware steps");
        Ok(Vec::new())
    }
}

/// Load the inputs, compile the pipeline and write it to `--output`.
///
/// # Errors
///
/// Returns the first error from loading, compiling, validating or writing.
#[instrument(skip_all, fields(test_path = %cli.test_path.display(), output = %cli.output.display()))]
pub fn execute(cli: &Cli) -> Result<Pipeline> {
    let config = plan_config(cli)?;
    let defaults = load_defaults(cli.config.as_deref())?;
    let amd_build_key = defaults.amd.build_key.clone();

    let test_steps = read_test_steps(&cli.test_path)?;
    let external_steps = load_external_steps(cli.external_hardware_test_path.as_deref())?;
    info!(
        test_steps = test_steps.len(),
        external_steps = external_steps.len(),
        changed_files = config.list_file_diff.len(),
        "Loaded test steps"
    );

    let pipeline = PipelineGenerator::with_defaults(config, defaults)?
        .generate(&test_steps, &external_steps)?;
    BuildkiteEmitter::new()
        .with_external_key(amd_build_key)
        .write(&pipeline, &cli.output)?;
    Ok(pipeline)
}
