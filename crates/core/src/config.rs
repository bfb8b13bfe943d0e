//! Generator configuration.
//!
//! Two layers:
//!
//! - [`PlanConfig`] holds the per-run inputs (commit, registry, changed
//!   files, run-all flag) and is validated once at construction.
//! - [`Defaults`] holds the fixed environment of the CI fleet (queue names,
//!   mounts, environment variables, helper scripts). It is built once at
//!   start-up, optionally overridden from a TOML file, and passed by
//!   reference to every component that needs it.

use crate::error::{Error, Result};
use crate::queue::AgentQueue;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Registry hosting the CI test images.
pub const DEFAULT_CONTAINER_REGISTRY: &str = "public.ecr.aws/q9t5s3a7";
/// Repository inside [`DEFAULT_CONTAINER_REGISTRY`].
pub const DEFAULT_CONTAINER_REGISTRY_REPO: &str = "vllm-ci-test-repo";
/// Separator used by the `list_file_diff` input.
pub const FILE_DIFF_SEPARATOR: char = '|';

/// Full lowercase git commit hash.
#[allow(clippy::expect_used)]
static COMMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{40}$").expect("Invalid commit regex"));

/// Per-run inputs of the generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanConfig {
    /// Registry host (and optional namespace)
    pub container_registry: String,
    /// Repository name under the registry
    pub container_registry_repo: String,
    /// Full 40 character commit hash being tested
    pub commit: String,
    /// Run every step regardless of the changed files
    pub run_all: bool,
    /// Paths changed relative to the main branch
    pub list_file_diff: Vec<String>,
}

impl PlanConfig {
    /// Create and validate a run configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `commit` is not a lowercase 40 character hex hash.
    pub fn new(
        container_registry: impl Into<String>,
        container_registry_repo: impl Into<String>,
        commit: impl Into<String>,
        run_all: bool,
        list_file_diff: Vec<String>,
    ) -> Result<Self> {
        let config = Self {
            container_registry: container_registry.into(),
            container_registry_repo: container_registry_repo.into(),
            commit: commit.into(),
            run_all,
            list_file_diff,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the commit is a full git commit hash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for anything but 40 lowercase hex characters.
    pub fn validate(&self) -> Result<()> {
        if !COMMIT_RE.is_match(&self.commit) {
            return Err(Error::config(format!(
                "commit '{}' is not a valid git commit hash",
                self.commit
            )));
        }
        Ok(())
    }

    /// Image reference the build step pushes and the tests pull.
    #[must_use]
    pub fn container_image(&self) -> String {
        format!(
            "{}/{}:{}",
            self.container_registry, self.container_registry_repo, self.commit
        )
    }

    /// Image reference for the AMD test image of this commit.
    #[must_use]
    pub fn amd_image(&self, defaults: &Defaults) -> String {
        format!("{}:{}", defaults.amd.repo, self.commit)
    }
}

/// Interpret a run-all flag value; only `1` and `true` enable it.
#[must_use]
pub fn parse_run_all(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true")
}

/// Split the `|`-separated changed-file list, dropping empty entries.
#[must_use]
pub fn parse_file_diff(raw: &str) -> Vec<String> {
    raw.split(FILE_DIFF_SEPARATOR)
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
        .collect()
}

/// A literal environment variable passed to test containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

impl EnvVar {
    /// Create a literal variable.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A secret-valued environment variable, always injected by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretEnv {
    /// Variable name inside the container
    pub name: String,
    /// Kubernetes secret holding the value
    pub secret_name: String,
    /// Key inside the Kubernetes secret
    pub secret_key: String,
}

/// Settings of the secondary (AMD) hardware fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmdDefaults {
    /// Image repository of the AMD test image
    pub repo: String,
    /// Placeholder replaced by the AMD image in external steps
    pub image_placeholder: String,
    /// Wrapper script running a command inside the AMD image
    pub test_script: String,
    /// Key of the AMD image build step
    pub build_key: String,
    /// Tag in `mirror_hardwares` that requests mirroring
    pub mirror_tag: String,
}

impl Default for AmdDefaults {
    fn default() -> Self {
        Self {
            repo: "rocm/vllm-ci".to_string(),
            image_placeholder: "DOCKER_IMAGE_AMD".to_string(),
            test_script: ".buildkite/run-amd-test.sh".to_string(),
            build_key: "amd-build".to_string(),
            mirror_tag: "amd".to_string(),
        }
    }
}

/// Fixed properties of the CI fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Commands run before every test (GPU probe, logging and feature flags)
    pub default_commands: Vec<String>,
    /// Hugging Face cache directory shared with the host
    pub hf_home: String,
    /// Shared memory mount
    pub shm_path: String,
    /// Literal environment passed to every test container
    pub environment: Vec<EnvVar>,
    /// Secret environment variable injected by reference
    pub secret_env: SecretEnv,
    /// Host variables propagated into docker containers by name
    pub passthrough_env: Vec<String>,
    /// Kubernetes priority class of test pods
    pub priority_class: String,
    /// Kubernetes resource name of a GPU
    pub gpu_resource: String,
    /// Node selector pinning pods to A100 nodes
    pub node_selector: BTreeMap<String, String>,
    /// Script distributing a multi-node test across hosts
    pub multi_node_script: String,
    /// Keys of external steps that always require approval
    pub steps_to_block: Vec<String>,
    /// Agent queue names
    pub queues: BTreeMap<AgentQueue, String>,
    /// Secondary hardware settings
    pub amd: AmdDefaults,
}

fn default_queue_names() -> BTreeMap<AgentQueue, String> {
    [
        (AgentQueue::AwsCpu, "cpu_queue"),
        (AgentQueue::AwsSmallCpu, "small_cpu_queue"),
        (AgentQueue::Aws1xL4, "gpu_1_queue"),
        (AgentQueue::Aws4xL4, "gpu_4_queue"),
        (AgentQueue::A100, "a100-queue"),
        (AgentQueue::AmdGpu, "amd"),
        (AgentQueue::AmdCpu, "amd-cpu"),
    ]
    .into_iter()
    .map(|(queue, name)| (queue, name.to_string()))
    .collect()
}

impl Default for Defaults {
    fn default() -> Self {
        let hf_home = "/root/.cache/huggingface".to_string();
        Self {
            default_commands: vec![
                "(command nvidia-smi || true)".to_string(),
                "export VLLM_LOGGING_LEVEL=DEBUG".to_string(),
                "export VLLM_ALLOW_DEPRECATED_BEAM_SEARCH=1".to_string(),
            ],
            environment: vec![
                EnvVar::new("HF_HOME", hf_home.clone()),
                EnvVar::new("VLLM_USAGE_SOURCE", "ci-test"),
            ],
            hf_home,
            shm_path: "/dev/shm".to_string(),
            secret_env: SecretEnv {
                name: "HF_TOKEN".to_string(),
                secret_name: "hf-token-secret".to_string(),
                secret_key: "token".to_string(),
            },
            passthrough_env: vec!["BUILDKITE_ANALYTICS_TOKEN".to_string()],
            priority_class: "ci".to_string(),
            gpu_resource: "nvidia.com/gpu".to_string(),
            node_selector: BTreeMap::from([(
                "nvidia.com/gpu.product".to_string(),
                "NVIDIA-A100-SXM4-80GB".to_string(),
            )]),
            multi_node_script: ".buildkite/run-multi-node-test.sh".to_string(),
            steps_to_block: Vec::new(),
            queues: default_queue_names(),
            amd: AmdDefaults::default(),
        }
    }
}

impl Defaults {
    /// Parse overrides from a TOML document on top of the built-in values.
    ///
    /// Queues missing from a `[queues]` table keep their built-in names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigFile`] when the document does not parse.
    pub fn from_toml_str(source: &str, path: &Path) -> Result<Self> {
        let mut defaults: Self = toml::from_str(source).map_err(|e| Error::ConfigFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        for (queue, name) in default_queue_names() {
            defaults.queues.entry(queue).or_insert(name);
        }
        Ok(defaults)
    }

    /// Load overrides from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputNotFound`] if the file is absent, [`Error::Io`]
    /// if it cannot be read and [`Error::ConfigFile`] if it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), "Loading generator defaults");
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&source, path)
    }

    /// Agent queue name for a queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvableQueue`] if the queue has no configured name.
    pub fn queue_name(&self, queue: AgentQueue) -> Result<&str> {
        self.queues
            .get(&queue)
            .map(String::as_str)
            .ok_or_else(|| Error::UnresolvableQueue {
                queue: queue.to_string(),
            })
    }
}
