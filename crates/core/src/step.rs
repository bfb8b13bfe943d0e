//! Test step definitions.
//!
//! A [`TestStep`] is the portable description of one CI test: what to run,
//! on which hardware class and which source paths it cares about. Steps are
//! deserialized into [`RawTestStep`] and converted with
//! [`TestStep::from_raw`], which runs every invariant check up front so an
//! invalid step can never reach the compiler.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Working directory used when a step does not set one.
pub const DEFAULT_WORKING_DIR: &str = "/vllm-workspace/tests";

/// Large accelerator classes served by the Kubernetes cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuType {
    /// NVIDIA A100 80GB
    A100,
}

impl GpuType {
    /// The spelling used in step files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::A100 => "a100",
        }
    }
}

impl fmt::Display for GpuType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GpuType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "a100" => Ok(Self::A100),
            other => Err(format!("unsupported gpu type '{other}' (expected one of: a100)")),
        }
    }
}

/// A test step exactly as written in the step file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawTestStep {
    /// Step label
    pub label: String,
    /// Part of the fast-check subset
    pub fast_check: Option<bool>,
    /// Secondary hardware vendors to mirror onto
    pub mirror_hardwares: Option<Vec<String>>,
    /// Large accelerator class name (`a100`)
    pub gpu: Option<String>,
    /// GPUs per node
    pub num_gpus: Option<u32>,
    /// Number of hosts
    pub num_nodes: Option<u32>,
    /// Directory the commands run in
    pub working_dir: Option<String>,
    /// Path fragments that trigger this step when changed
    pub source_file_dependencies: Option<Vec<String>>,
    /// Run without any accelerator
    pub no_gpu: Option<bool>,
    /// Let the build pass when this step fails
    pub soft_fail: Option<bool>,
    /// Number of parallel jobs
    pub parallelism: Option<u32>,
    /// Never run without manual approval
    pub optional: bool,
    /// Single command form
    pub command: Option<String>,
    /// Command list form
    pub commands: Option<Vec<String>>,
}

/// A validated test step.
///
/// Invariants: `label` yields a non-empty step key, `commands` holds at
/// least one entry, `gpu` and `no_gpu` are never both set, and multi-node
/// steps carry `num_gpus` plus exactly one command per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStep {
    /// Human readable label, also the source of the step key
    pub label: String,
    /// Directory the commands run in
    pub working_dir: String,
    /// Large accelerator class, if any
    pub gpu: Option<GpuType>,
    /// GPUs per node
    pub num_gpus: Option<u32>,
    /// Number of hosts; greater than one means multi-node
    pub num_nodes: u32,
    /// Run without any accelerator
    pub no_gpu: bool,
    /// Path fragments that trigger this step when changed
    pub source_file_dependencies: Option<Vec<String>>,
    /// Secondary hardware vendors to mirror onto
    pub mirror_hardwares: Vec<String>,
    /// Part of the fast-check subset
    pub fast_check: bool,
    /// Let the build pass when this step fails
    pub soft_fail: Option<bool>,
    /// Number of parallel jobs Buildkite splits the step into
    pub parallelism: Option<u32>,
    /// Never run without manual approval
    pub optional: bool,
    /// Commands, one per node for multi-node steps
    pub commands: Vec<String>,
}

impl TestStep {
    /// Validate a raw step and normalize it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the step label and the violated rule.
    pub fn from_raw(raw: RawTestStep) -> Result<Self> {
        if raw.label.trim().is_empty() {
            return Err(Error::config("test step is missing a 'label'"));
        }
        let label = raw.label;
        if get_step_key(&label).is_empty() {
            return Err(Error::step(
                label,
                "label must contain at least one key character",
            ));
        }

        let commands = match (raw.command, raw.commands) {
            (Some(_), Some(_)) => {
                return Err(Error::step(
                    label,
                    "'command' and 'commands' cannot be defined together",
                ));
            }
            (Some(command), None) => vec![command],
            (None, Some(commands)) if !commands.is_empty() => commands,
            (None, _) => {
                return Err(Error::step(
                    label,
                    "either 'command' or 'commands' must be defined",
                ));
            }
        };

        let no_gpu = raw.no_gpu.unwrap_or(false);
        let gpu = match raw.gpu.as_deref() {
            Some(gpu) => Some(gpu.parse::<GpuType>().map_err(|e| Error::step(&label, e))?),
            None => None,
        };
        if gpu.is_some() && no_gpu {
            return Err(Error::step(
                label,
                "'gpu' and 'no_gpu' cannot be defined together",
            ));
        }

        if raw.num_gpus == Some(0) {
            return Err(Error::step(label, "'num_gpus' must be a positive integer"));
        }
        if raw.parallelism == Some(0) {
            return Err(Error::step(label, "'parallelism' must be a positive integer"));
        }

        let num_nodes = raw.num_nodes.unwrap_or(1);
        if num_nodes == 0 {
            return Err(Error::step(label, "'num_nodes' must be at least 1"));
        }
        if raw.num_nodes.is_some() && raw.num_gpus.is_none() {
            return Err(Error::step(
                label,
                "'num_gpus' must be defined if 'num_nodes' is defined",
            ));
        }
        if num_nodes > 1 && commands.len() != num_nodes as usize {
            return Err(Error::step(
                label,
                format!(
                    "number of commands ({}) must match the number of nodes ({num_nodes})",
                    commands.len()
                ),
            ));
        }

        Ok(Self {
            working_dir: raw
                .working_dir
                .unwrap_or_else(|| DEFAULT_WORKING_DIR.to_string()),
            gpu,
            num_gpus: raw.num_gpus,
            num_nodes,
            no_gpu,
            source_file_dependencies: raw.source_file_dependencies,
            mirror_hardwares: raw.mirror_hardwares.unwrap_or_default(),
            fast_check: raw.fast_check.unwrap_or(false),
            soft_fail: raw.soft_fail,
            parallelism: raw.parallelism,
            optional: raw.optional,
            commands,
            label,
        })
    }

    /// Stable Buildkite key for this step.
    #[must_use]
    pub fn key(&self) -> String {
        get_step_key(&self.label)
    }

    /// Whether the step spans more than one host.
    #[must_use]
    pub const fn is_multi_node(&self) -> bool {
        self.num_nodes > 1
    }

    /// Whether the step asks to be mirrored onto the given hardware vendor.
    #[must_use]
    pub fn mirrors_to(&self, hardware: &str) -> bool {
        self.mirror_hardwares.iter().any(|h| h == hardware)
    }
}

impl TryFrom<RawTestStep> for TestStep {
    type Error = Error;

    fn try_from(raw: RawTestStep) -> Result<Self> {
        Self::from_raw(raw)
    }
}

/// Derive a Buildkite step key from a human readable label.
///
/// Lowercases the label, folds runs of spaces and commas into a single
/// hyphen and drops parentheses and percent signs.
#[must_use]
pub fn get_step_key(label: &str) -> String {
    let mut key = String::with_capacity(label.len());
    for c in label.chars().flat_map(char::to_lowercase) {
        match c {
            ' ' | ',' => {
                if !key.is_empty() && !key.ends_with('-') {
                    key.push('-');
                }
            }
            '(' | ')' | '%' => {}
            _ => key.push(c),
        }
    }
    key
}
