//! kiteplan CLI Application
//!
//! Compiles the test step definitions of a repository into the Buildkite
//! pipeline for one commit.

// CLI binary needs to output to stderr - this is intentional
#![allow(clippy::print_stderr)]

use kiteplan::cli::{self, Cli, CliError, EXIT_OK, EXIT_OTHER, exit_code_for, render_error};
use kiteplan::generate;
use kiteplan::tracing::{TracingConfig, init_tracing};

fn main() {
    // NOTE: Using eprintln! in panic hook is intentional - tracing may not be
    // usable during a panic.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Application panicked: {panic_info}");
        eprintln!("Internal error occurred. Run with RUST_LOG=debug for more information.");
    }));

    let cli = cli::parse();
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let tracing_config = TracingConfig {
        format: cli.format,
        level: cli.level.into(),
    };
    if let Err(e) = init_tracing(tracing_config) {
        render_error(&CliError::other(e.to_string()));
        return EXIT_OTHER;
    }

    match generate::execute(cli) {
        Ok(pipeline) => {
            tracing::info!(steps = pipeline.steps.len(), "Pipeline generated");
            EXIT_OK
        }
        Err(err) => {
            let err = CliError::from(err);
            render_error(&err);
            exit_code_for(&err)
        }
    }
}
