//! Buildkite Pipeline Schema Types
//!
//! Defines the data structures for Buildkite pipeline YAML generation.
//! See: <https://buildkite.com/docs/pipelines/configure/defining-steps>
//!
//! Only the subset of the schema the generator emits is modelled. Types
//! deserialize as well as serialize so a written pipeline can be read back.

use crate::plugin::Plugin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A Buildkite pipeline definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline steps, in display order
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Keys of all steps, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(Step::key)
    }
}

/// A step in a Buildkite pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// A command step that runs commands
    Command(Box<CommandStep>),
    /// A block step for manual approval
    Block(BlockStep),
}

impl Step {
    /// The step's key.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Command(step) => &step.key,
            Self::Block(step) => &step.key,
        }
    }

    /// The key this step waits for, if any.
    #[must_use]
    pub fn depends_on(&self) -> Option<&str> {
        match self {
            Self::Command(step) => step.depends_on.as_deref(),
            Self::Block(step) => step.depends_on.as_deref(),
        }
    }

    /// The command step, if this is one.
    #[must_use]
    pub fn as_command(&self) -> Option<&CommandStep> {
        match self {
            Self::Command(step) => Some(&**step),
            Self::Block(_) => None,
        }
    }

    /// The block step, if this is one.
    #[must_use]
    pub const fn as_block(&self) -> Option<&BlockStep> {
        match self {
            Self::Block(step) => Some(step),
            Self::Command(_) => None,
        }
    }
}

impl From<CommandStep> for Step {
    fn from(step: CommandStep) -> Self {
        Self::Command(Box::new(step))
    }
}

impl From<BlockStep> for Step {
    fn from(step: BlockStep) -> Self {
        Self::Block(step)
    }
}

/// A command step that executes commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStep {
    /// Display label for the step
    pub label: String,

    /// Unique key for the step (used for `depends_on`)
    pub key: String,

    /// Agent targeting rules
    pub agents: AgentRules,

    /// Commands to execute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,

    /// Plugins wrapping the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<Plugin>>,

    /// Number of parallel jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<u32>,

    /// Soft fail configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_fail: Option<bool>,

    /// Key of the step this one waits for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,

    /// Environment variables for this step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,

    /// Retry configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl CommandStep {
    /// Create a command step on `queue` with no commands yet.
    pub fn new(label: impl Into<String>, key: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            agents: AgentRules::with_queue(queue),
            commands: None,
            plugins: None,
            parallelism: None,
            soft_fail: None,
            depends_on: None,
            env: None,
            retry: None,
        }
    }
}

/// A block step for manual approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockStep {
    /// Block step marker
    pub block: String,

    /// Step dependency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<String>,

    /// Unique key for the step
    pub key: String,
}

impl BlockStep {
    /// Create a new block step with the given label and key
    #[must_use]
    pub fn new(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            block: label.into(),
            depends_on: None,
            key: key.into(),
        }
    }

    /// Make the block wait for another step
    #[must_use]
    pub fn with_depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on = Some(key.into());
        self
    }
}

/// Agent targeting rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRules {
    /// Queue name
    pub queue: String,
}

impl AgentRules {
    /// Create agent rules with a queue
    pub fn with_queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Automatic retry settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automatic: Option<AutomaticRetry>,
}

/// Automatic retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutomaticRetry {
    /// Simple boolean
    Enabled(bool),
    /// Detailed configuration
    Config(Vec<AutomaticRetryRule>),
}

/// Automatic retry rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomaticRetryRule {
    /// Exit status to retry on (negative values are agent-side failures)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,

    /// Number of retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}
