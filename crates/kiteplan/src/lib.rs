// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

//! kiteplan - compile test step definitions into Buildkite pipelines
//!
//! The binary reads a `{ steps: [...] }` test definition, decides per step
//! whether it runs automatically for the current change, and writes the
//! Buildkite pipeline that `buildkite-agent pipeline upload` consumes.
//!
//! ```ignore
//! kiteplan --commit "$BUILDKITE_COMMIT" \
//!     --list-file-diff "$(git diff --name-only origin/main | tr '\n' '|')" \
//!     --output .buildkite/pipeline.yaml
//! ```

// The CLI renders diagnostics on stderr
#![allow(clippy::print_stderr)]

/// CLI argument parsing and exit codes.
pub mod cli;
/// Loading inputs, compiling and writing the pipeline.
pub mod generate;
/// Tracing subscriber setup.
pub mod tracing;
