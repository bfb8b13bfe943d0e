//! Shell command composition for test steps.

use crate::config::Defaults;
use crate::step::TestStep;

/// Separator between statements of a composed command.
pub const COMMAND_SEPARATOR: &str = ";\n";

/// Join the default preamble, a `cd` into the working directory and the
/// step commands into one shell script.
#[must_use]
pub fn get_full_test_command(
    defaults: &Defaults,
    test_commands: &[String],
    working_dir: &str,
) -> String {
    defaults
        .default_commands
        .iter()
        .cloned()
        .chain(std::iter::once(format!("cd {working_dir}")))
        .chain(test_commands.iter().cloned())
        .collect::<Vec<_>>()
        .join(COMMAND_SEPARATOR)
}

/// `bash -c <script>` argument vector for a single-node step.
#[must_use]
pub fn get_test_bash_command(defaults: &Defaults, step: &TestStep) -> Vec<String> {
    vec![
        "bash".to_string(),
        "-c".to_string(),
        get_full_test_command(defaults, &step.commands, &step.working_dir),
    ]
}

/// Invocation of the multi-node coordination script.
///
/// Arguments are positional: working directory, node count, GPUs per node,
/// image and one shell-quoted command per node.
#[must_use]
pub fn get_multi_node_test_command(
    defaults: &Defaults,
    test_commands: &[String],
    working_dir: &str,
    num_nodes: u32,
    num_gpus: u32,
    docker_image: &str,
) -> String {
    let mut parts = vec![
        defaults.multi_node_script.clone(),
        working_dir.to_string(),
        num_nodes.to_string(),
        num_gpus.to_string(),
        docker_image.to_string(),
    ];
    parts.extend(test_commands.iter().map(|command| quote(command)));
    parts.join(" ")
}

/// One-line command for a vendor wrapper script, reusing the step's
/// original commands rather than the backend specific form.
#[must_use]
pub fn get_wrapped_test_command(script: &str, step: &TestStep) -> String {
    let inner = std::iter::once(format!("cd {}", step.working_dir))
        .chain(step.commands.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ; ");
    format!("bash {script} {}", quote(&inner))
}

fn quote(arg: &str) -> String {
    // try_quote only rejects NUL bytes; fall back to plain POSIX quoting without them
    shlex::try_quote(arg).map_or_else(
        |_| format!("'{}'", arg.replace('\0', "").replace('\'', r"'\''")),
        |quoted| quoted.into_owned(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{RawTestStep, TestStep};

    fn no_preamble() -> Defaults {
        Defaults {
            default_commands: vec![],
            ..Defaults::default()
        }
    }

    #[test]
    fn test_full_test_command() {
        let defaults = no_preamble();
        assert_eq!(
            get_full_test_command(&defaults, &["echo 'hello'".to_string()], "/vllm-workspace/tests"),
            "cd /vllm-workspace/tests;\necho 'hello'"
        );
        assert_eq!(
            get_full_test_command(
                &defaults,
                &["echo 'hello1'".to_string(), "echo 'hello2'".to_string()],
                "/vllm-workspace/tests"
            ),
            "cd /vllm-workspace/tests;\necho 'hello1';\necho 'hello2'"
        );
    }

    #[test]
    fn test_full_test_command_preamble_first() {
        let defaults = Defaults::default();
        let command = get_full_test_command(&defaults, &["pytest -v -s a".to_string()], "/tests");
        let lines: Vec<&str> = command.split(COMMAND_SEPARATOR).collect();
        assert_eq!(lines[0], "(command nvidia-smi || true)");
        assert_eq!(lines[1], "export VLLM_LOGGING_LEVEL=DEBUG");
        assert_eq!(lines[2], "export VLLM_ALLOW_DEPRECATED_BEAM_SEARCH=1");
        assert_eq!(lines[3], "cd /tests");
        assert_eq!(lines[4], "pytest -v -s a");
    }

    #[test]
    fn test_multi_node_test_command() {
        let defaults = Defaults::default();
        let commands = vec![
            "distributed/test_same_node.py;pytest -v -s distributed/test_pipeline_parallel.py".to_string(),
            "distributed/test_same_node.py".to_string(),
        ];
        let command = get_multi_node_test_command(
            &defaults,
            &commands,
            "/vllm-workspace/tests",
            2,
            4,
            "ecr-path/vllm-ci-test-repo:latest",
        );
        assert!(command.starts_with(
            ".buildkite/run-multi-node-test.sh /vllm-workspace/tests 2 4 ecr-path/vllm-ci-test-repo:latest "
        ));

        let args = shlex::split(&command).unwrap();
        assert_eq!(args.len(), 7);
        assert_eq!(args[5], commands[0]);
        assert_eq!(args[6], commands[1]);
    }

    #[test]
    fn test_multi_node_quotes_embedded_quotes() {
        let defaults = Defaults::default();
        let commands = vec!["echo 'node 0'".to_string(), "echo \"node 1\"".to_string()];
        let command = get_multi_node_test_command(&defaults, &commands, "/w", 2, 1, "img:tag");
        let args = shlex::split(&command).unwrap();
        assert_eq!(&args[5..], commands.as_slice());
    }

    #[test]
    fn test_wrapped_test_command() {
        let step = TestStep::from_raw(RawTestStep {
            label: "Basic Correctness".to_string(),
            working_dir: Some("/vllm-workspace/tests".to_string()),
            commands: Some(vec!["pytest -v -s basic_correctness".to_string(), "echo done".to_string()]),
            ..Default::default()
        })
        .unwrap();
        let command = get_wrapped_test_command(".buildkite/run-amd-test.sh", &step);
        let args = shlex::split(&command).unwrap();
        assert_eq!(args[0], "bash");
        assert_eq!(args[1], ".buildkite/run-amd-test.sh");
        assert_eq!(
            args[2],
            "cd /vllm-workspace/tests ; pytest -v -s basic_correctness ; echo done"
        );
    }
}
