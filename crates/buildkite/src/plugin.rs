//! Execution backends.
//!
//! A test step runs either in a docker container on a plain agent or in a
//! Kubernetes pod on the A100 cluster. Multi-node steps get no plugin at
//! all: their command already calls the multi-node coordination script,
//! which starts the containers itself.

use kiteplan_core::command::{get_multi_node_test_command, get_test_bash_command};
use kiteplan_core::{Defaults, GpuType, TestStep};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Name (and pinned version) of the Buildkite docker plugin.
pub const DOCKER_PLUGIN_NAME: &str = "docker#v5.2.0";
/// Name of the Buildkite Kubernetes plugin.
pub const KUBERNETES_PLUGIN_NAME: &str = "kubernetes";

const SHM_VOLUME: &str = "devshm";
const HF_CACHE_VOLUME: &str = "hf-cache";

/// A plugin entry of a command step.
///
/// Buildkite expects each entry to be a single-key map from plugin name to
/// plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Plugin {
    /// `docker#v5.2.0: {...}`
    Docker(DockerPluginEntry),
    /// `kubernetes: {...}`
    Kubernetes(KubernetesPluginEntry),
}

/// Single-key wrapper for the docker plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerPluginEntry {
    /// Plugin configuration
    #[serde(rename = "docker#v5.2.0")]
    pub docker: DockerPlugin,
}

/// Single-key wrapper for the Kubernetes plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubernetesPluginEntry {
    /// Plugin configuration
    pub kubernetes: KubernetesPlugin,
}

/// Docker plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DockerPlugin {
    /// Image the step runs in
    pub image: String,
    /// Pull the image even if the agent has it cached
    pub always_pull: bool,
    /// Pass the agent's environment into the container
    pub propagate_environment: bool,
    /// `all` to pass every GPU through; absent for CPU-only steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<String>,
    /// Mount the buildkite-agent binary into the container
    pub mount_buildkite_agent: bool,
    /// Argument vector run in the container
    pub command: Vec<String>,
    /// `NAME=value` literals and bare names propagated from the agent
    pub environment: Vec<String>,
    /// `host:container` bind mounts
    pub volumes: Vec<String>,
}

impl DockerPlugin {
    /// Docker configuration running `command` in `image`.
    #[must_use]
    pub fn new(defaults: &Defaults, image: &str, command: Vec<String>, no_gpu: bool) -> Self {
        let environment = defaults
            .environment
            .iter()
            .map(|var| format!("{}={}", var.name, var.value))
            .chain(std::iter::once(defaults.secret_env.name.clone()))
            .chain(defaults.passthrough_env.iter().cloned())
            .collect();
        Self {
            image: image.to_string(),
            always_pull: true,
            propagate_environment: true,
            gpus: (!no_gpu).then(|| "all".to_string()),
            mount_buildkite_agent: false,
            command,
            environment,
            volumes: vec![
                format!("{shm}:{shm}", shm = defaults.shm_path),
                format!("{hf}:{hf}", hf = defaults.hf_home),
            ],
        }
    }
}

/// Kubernetes plugin configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesPlugin {
    /// Pod the step runs in
    pub pod_spec: PodSpec,
}

/// Pod specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers of the pod; the generator emits exactly one
    pub containers: Vec<Container>,
    /// Scheduling priority class
    pub priority_class_name: String,
    /// Node labels the pod must be scheduled on
    pub node_selector: BTreeMap<String, String>,
    /// Volumes the containers can mount
    pub volumes: Vec<Volume>,
}

/// A container of the pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Image the container runs
    pub image: String,
    /// Argument vector run in the container
    pub command: Vec<String>,
    /// Resource limits
    pub resources: Resources,
    /// Volumes mounted into the container
    pub volume_mounts: Vec<VolumeMount>,
    /// Environment variables
    pub env: Vec<ContainerEnv>,
}

/// Container resource requirements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Upper bounds keyed by resource name, such as `nvidia.com/gpu`
    pub limits: BTreeMap<String, u32>,
}

/// Mount of a pod volume into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of the pod volume
    pub name: String,
    /// Path inside the container
    pub mount_path: String,
}

/// A container environment variable, either literal or a secret reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerEnv {
    /// Variable name
    pub name: String,
    /// Literal value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Reference resolved by Kubernetes at pod start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<EnvVarSource>,
}

/// Source of an environment variable value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSource {
    /// Key of a Kubernetes secret
    pub secret_key_ref: SecretKeySelector,
}

/// Selects one key of a Kubernetes secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Key inside the secret
    pub key: String,
}

/// A pod volume backed by memory or a host directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name referenced by mounts
    pub name: String,
    /// Scratch space living as long as the pod
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDir>,
    /// Directory of the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPath>,
}

/// Pod-lifetime scratch volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyDir {
    /// Storage medium, `Memory` for tmpfs
    pub medium: String,
}

/// Directory mounted from the node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPath {
    /// Path on the node
    pub path: String,
    /// Kubernetes host path type, such as `Directory`
    #[serde(rename = "type")]
    pub path_type: String,
}

impl KubernetesPlugin {
    /// Pod configuration running `command` in `image` with `num_gpus` GPUs.
    #[must_use]
    pub fn new(defaults: &Defaults, image: &str, command: Vec<String>, num_gpus: u32) -> Self {
        let env = defaults
            .environment
            .iter()
            .map(|var| ContainerEnv {
                name: var.name.clone(),
                value: Some(var.value.clone()),
                value_from: None,
            })
            .chain(std::iter::once(ContainerEnv {
                name: defaults.secret_env.name.clone(),
                value: None,
                value_from: Some(EnvVarSource {
                    secret_key_ref: SecretKeySelector {
                        name: defaults.secret_env.secret_name.clone(),
                        key: defaults.secret_env.secret_key.clone(),
                    },
                }),
            }))
            .collect();

        let container = Container {
            image: image.to_string(),
            command,
            resources: Resources {
                limits: BTreeMap::from([(defaults.gpu_resource.clone(), num_gpus)]),
            },
            volume_mounts: vec![
                VolumeMount {
                    name: SHM_VOLUME.to_string(),
                    mount_path: defaults.shm_path.clone(),
                },
                VolumeMount {
                    name: HF_CACHE_VOLUME.to_string(),
                    mount_path: defaults.hf_home.clone(),
                },
            ],
            env,
        };

        Self {
            pod_spec: PodSpec {
                containers: vec![container],
                priority_class_name: defaults.priority_class.clone(),
                node_selector: defaults.node_selector.clone(),
                volumes: vec![
                    Volume {
                        name: SHM_VOLUME.to_string(),
                        empty_dir: Some(EmptyDir {
                            medium: "Memory".to_string(),
                        }),
                        host_path: None,
                    },
                    Volume {
                        name: HF_CACHE_VOLUME.to_string(),
                        empty_dir: None,
                        host_path: Some(HostPath {
                            path: defaults.hf_home.clone(),
                            path_type: "Directory".to_string(),
                        }),
                    },
                ],
            },
        }
    }
}

/// How a step is launched on its agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Single-host docker container
    Container(DockerPlugin),
    /// Kubernetes pod on the A100 cluster
    Pod(KubernetesPlugin),
    /// No plugin; the step command is the multi-node script invocation
    MultiNode(String),
}

impl Backend {
    /// Plugin list for the command step, if the backend uses one.
    #[must_use]
    pub fn plugins(&self) -> Option<Vec<Plugin>> {
        match self {
            Self::Container(docker) => Some(vec![Plugin::Docker(DockerPluginEntry {
                docker: docker.clone(),
            })]),
            Self::Pod(kubernetes) => Some(vec![Plugin::Kubernetes(KubernetesPluginEntry {
                kubernetes: kubernetes.clone(),
            })]),
            Self::MultiNode(_) => None,
        }
    }

    /// Commands that replace the plugin, if any.
    #[must_use]
    pub fn commands(&self) -> Option<Vec<String>> {
        match self {
            Self::MultiNode(command) => Some(vec![command.clone()]),
            Self::Container(_) | Self::Pod(_) => None,
        }
    }

    /// Whether the step's `commands` carry the invocation instead of a plugin.
    #[must_use]
    pub const fn overrides_commands(&self) -> bool {
        matches!(self, Self::MultiNode(_))
    }
}

/// Pick the backend for `step` running in `container_image`.
///
/// Multi-node steps win over everything, then A100 steps with a GPU count
/// run in a pod; everything else runs in docker.
#[must_use]
pub fn select_backend(defaults: &Defaults, step: &TestStep, container_image: &str) -> Backend {
    if step.is_multi_node() {
        let num_gpus = step.num_gpus.unwrap_or(1);
        debug!(step = %step.label, nodes = step.num_nodes, "Using multi-node backend");
        return Backend::MultiNode(get_multi_node_test_command(
            defaults,
            &step.commands,
            &step.working_dir,
            step.num_nodes,
            num_gpus,
            container_image,
        ));
    }

    let command = get_test_bash_command(defaults, step);
    match (step.gpu, step.num_gpus) {
        (Some(GpuType::A100), Some(num_gpus)) => {
            debug!(step = %step.label, num_gpus, "Using kubernetes backend");
            Backend::Pod(KubernetesPlugin::new(defaults, container_image, command, num_gpus))
        }
        (gpu, _) => {
            if gpu.is_some() {
                warn!(step = %step.label, "A100 step without num_gpus runs in docker");
            }
            debug!(step = %step.label, no_gpu = step.no_gpu, "Using docker backend");
            Backend::Container(DockerPlugin::new(defaults, container_image, command, step.no_gpu))
        }
    }
}
