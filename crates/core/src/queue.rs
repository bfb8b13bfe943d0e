//! Agent queue resolution.
//!
//! Every step in the generated pipeline is pinned to one Buildkite agent
//! queue. The queue is picked from the step's hardware requirements only;
//! the concrete queue *names* live in [`Defaults`](crate::config::Defaults)
//! so deployments can rename them without touching this policy.

use crate::step::GpuType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A pool of agents with a fixed hardware shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentQueue {
    /// General purpose CPU agents (image builds)
    AwsCpu,
    /// Small CPU agents for tests that need no accelerator
    AwsSmallCpu,
    /// Agents with a single L4 GPU
    Aws1xL4,
    /// Agents with four L4 GPUs
    Aws4xL4,
    /// Kubernetes cluster with A100 GPUs
    A100,
    /// AMD GPU agents
    AmdGpu,
    /// AMD CPU agents
    AmdCpu,
}

impl AgentQueue {
    /// All queues, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::AwsCpu,
        Self::AwsSmallCpu,
        Self::Aws1xL4,
        Self::Aws4xL4,
        Self::A100,
        Self::AmdGpu,
        Self::AmdCpu,
    ];

    /// Identifier used in configuration files.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwsCpu => "aws_cpu",
            Self::AwsSmallCpu => "aws_small_cpu",
            Self::Aws1xL4 => "aws1x_l4",
            Self::Aws4xL4 => "aws4x_l4",
            Self::A100 => "a100",
            Self::AmdGpu => "amd_gpu",
            Self::AmdCpu => "amd_cpu",
        }
    }
}

impl fmt::Display for AgentQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the agent queue for a step's hardware requirements.
///
/// Precedence: `no_gpu` wins, then the A100 class regardless of GPU count,
/// then single vs multi L4 by `num_gpus` (unset counts as one).
#[must_use]
pub fn resolve_queue(no_gpu: bool, gpu: Option<GpuType>, num_gpus: Option<u32>) -> AgentQueue {
    if no_gpu {
        return AgentQueue::AwsSmallCpu;
    }
    if gpu == Some(GpuType::A100) {
        return AgentQueue::A100;
    }
    match num_gpus {
        None | Some(1) => AgentQueue::Aws1xL4,
        Some(_) => AgentQueue::Aws4xL4,
    }
}
