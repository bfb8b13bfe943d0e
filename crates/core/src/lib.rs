//! Core types for kiteplan.
//!
//! This crate holds everything about a test step that does not depend on
//! the CI engine: the validated [`TestStep`] model, the
//! [`resolve_queue`] policy, shell command composition and the
//! [`should_run_automatically`] gating rule. The Buildkite specific
//! schema and graph assembly live in `kiteplan-buildkite`.

pub mod command;
pub mod config;
pub mod error;
pub mod gate;
pub mod loader;
pub mod queue;
pub mod step;

pub use config::{Defaults, PlanConfig};
pub use error::{Error, Result};
pub use gate::should_run_automatically;
pub use queue::{AgentQueue, resolve_queue};
pub use step::{GpuType, RawTestStep, TestStep, get_step_key};
