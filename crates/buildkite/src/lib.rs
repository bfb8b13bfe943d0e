//! Buildkite pipeline generation for kiteplan
//!
//! This crate turns validated [`kiteplan_core::TestStep`]s into a Buildkite
//! pipeline: the image build step, one command step per test (behind a
//! block step when the change does not touch its sources), external AMD
//! steps and AMD mirrors.
//!
//! # Example
//!
//! ```ignore
//! use kiteplan_buildkite::{BuildkiteEmitter, PipelineGenerator};
//! use kiteplan_core::PlanConfig;
//!
//! let config = PlanConfig::new("public.ecr.aws/q9t5s3a7", "vllm-ci-test-repo", commit, false, diff)?;
//! let pipeline = PipelineGenerator::new(config)?.generate(&steps, &[])?;
//! let yaml = BuildkiteEmitter::new().emit(&pipeline)?;
//! ```
//!
//! # Test Step to Buildkite Mapping
//!
//! | Test step | Buildkite YAML |
//! |-----------|----------------|
//! | `label` | `label`, `key` (normalized) |
//! | `no_gpu` / `gpu` / `num_gpus` | `agents: { queue }` |
//! | `gpu: a100` | `kubernetes` plugin |
//! | `num_nodes > 1` | multi-node script in `commands` |
//! | otherwise | `docker` plugin |
//! | `source_file_dependencies` / `optional` | `block` step before the test |
//! | `mirror_hardwares: [amd]` | extra `AMD: <label>` step |

pub mod emitter;
pub mod generator;
pub mod image_build;
pub mod plugin;
pub mod schema;

pub use emitter::BuildkiteEmitter;
pub use generator::{PipelineGenerator, get_block_step};
pub use plugin::{Backend, Plugin, select_backend};
pub use schema::{BlockStep, CommandStep, Pipeline, Step};
