//! Buildkite Pipeline Generator
//!
//! Compiles validated test steps into the ordered list of Buildkite steps:
//!
//! 1. the image build step,
//! 2. every test step in input order, each preceded by its block step when
//!    it needs manual approval,
//! 3. external AMD steps (with their block steps),
//! 4. AMD mirrors of test steps that ask for them.
//!
//! The order is the display order in Buildkite and must be reproducible.

use crate::image_build::get_build_commands;
use crate::plugin::select_backend;
use crate::schema::{
    AutomaticRetry, AutomaticRetryRule, BlockStep, CommandStep, Pipeline, RetryConfig, Step,
};
use kiteplan_core::command::get_wrapped_test_command;
use kiteplan_core::{
    AgentQueue, Defaults, PlanConfig, Result, TestStep, get_step_key, resolve_queue,
    should_run_automatically,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Key of the image build step every test waits for.
pub const BUILD_STEP_KEY: &str = "build";

/// Label of the image build step.
pub const BUILD_STEP_LABEL: &str = ":docker: build image";

/// Block step guarding the step with the given label.
#[must_use]
pub fn get_block_step(step_label: &str) -> BlockStep {
    BlockStep::new(
        format!("Run {step_label}"),
        format!("block-{}", get_step_key(step_label)),
    )
    .with_depends_on(BUILD_STEP_KEY)
}

fn docker_buildkit_env() -> BTreeMap<String, String> {
    BTreeMap::from([("DOCKER_BUILDKIT".to_string(), "1".to_string())])
}

/// Compiles test steps into a Buildkite [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineGenerator {
    config: PlanConfig,
    defaults: Defaults,
}

impl PipelineGenerator {
    /// Create a generator with the built-in fleet defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(config: PlanConfig) -> Result<Self> {
        Self::with_defaults(config, Defaults::default())
    }

    /// Create a generator with custom fleet defaults.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn with_defaults(config: PlanConfig, defaults: Defaults) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, defaults })
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &PlanConfig {
        &self.config
    }

    /// The fleet defaults.
    #[must_use]
    pub const fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    /// Build the Docker image and push it to the container registry.
    ///
    /// # Errors
    ///
    /// Returns [`kiteplan_core::Error::UnresolvableQueue`] if the CPU queue has no name.
    pub fn generate_build_step(&self) -> Result<CommandStep> {
        let mut step = CommandStep::new(
            BUILD_STEP_LABEL,
            BUILD_STEP_KEY,
            self.defaults.queue_name(AgentQueue::AwsCpu)?,
        );
        step.commands = Some(get_build_commands(
            &self.config.container_registry,
            &self.config.commit,
            &self.config.container_image(),
        ));
        step.env = Some(docker_buildkit_env());
        step.retry = Some(RetryConfig {
            automatic: Some(AutomaticRetry::Config(vec![
                AutomaticRetryRule {
                    exit_status: Some(-1),
                    limit: Some(2),
                },
                AutomaticRetryRule {
                    exit_status: Some(-10),
                    limit: Some(2),
                },
            ])),
        });
        Ok(step)
    }

    /// Convert a test step into its Buildkite command step.
    ///
    /// The step depends on the build step; gating is applied by
    /// [`Self::test_step_to_steps`].
    ///
    /// # Errors
    ///
    /// Returns [`kiteplan_core::Error::UnresolvableQueue`] if the step's queue has no name.
    pub fn step_to_buildkite(&self, step: &TestStep) -> Result<CommandStep> {
        let queue = resolve_queue(step.no_gpu, step.gpu, step.num_gpus);
        let backend = select_backend(&self.defaults, step, &self.config.container_image());

        let mut command_step =
            CommandStep::new(&step.label, step.key(), self.defaults.queue_name(queue)?);
        command_step.commands = backend.commands();
        command_step.plugins = backend.plugins();
        command_step.parallelism = step.parallelism;
        command_step.soft_fail = step.soft_fail;
        command_step.depends_on = Some(BUILD_STEP_KEY.to_string());
        Ok(command_step)
    }

    /// Buildkite steps for one test step: a block step when it needs
    /// manual approval, followed by the command step.
    ///
    /// # Errors
    ///
    /// See [`Self::step_to_buildkite`].
    pub fn test_step_to_steps(&self, step: &TestStep) -> Result<Vec<Step>> {
        let mut command_step = self.step_to_buildkite(step)?;
        if should_run_automatically(step, self.config.run_all, &self.config.list_file_diff) {
            return Ok(vec![command_step.into()]);
        }
        let block_step = get_block_step(&step.label);
        debug!(step = %step.label, block = %block_step.key, "Step requires manual approval");
        command_step.depends_on = Some(block_step.key.clone());
        Ok(vec![block_step.into(), command_step.into()])
    }

    /// Steps for the external AMD test definitions.
    ///
    /// The AMD image placeholder in their commands is replaced with this
    /// commit's AMD image, and keys on the block-list get a block step.
    ///
    /// # Errors
    ///
    /// Returns [`kiteplan_core::Error::UnresolvableQueue`] if an AMD queue has no name.
    pub fn external_hardware_steps(&self, external_steps: &[TestStep]) -> Result<Vec<Step>> {
        let amd_image = self.config.amd_image(&self.defaults);
        let placeholder = self.defaults.amd.image_placeholder.as_str();
        let mut steps = Vec::new();

        for external in external_steps {
            let queue = if external.no_gpu {
                AgentQueue::AmdCpu
            } else {
                AgentQueue::AmdGpu
            };
            let mut command_step =
                CommandStep::new(&external.label, external.key(), self.defaults.queue_name(queue)?);
            command_step.commands = Some(
                external
                    .commands
                    .iter()
                    .map(|command| command.replace(placeholder, &amd_image))
                    .collect(),
            );
            command_step.parallelism = external.parallelism;
            command_step.soft_fail = external.soft_fail;
            command_step.depends_on = Some(BUILD_STEP_KEY.to_string());

            if self.defaults.steps_to_block.contains(&command_step.key) {
                let block_step = get_block_step(&external.label);
                command_step.depends_on = Some(block_step.key.clone());
                steps.push(block_step.into());
            }
            steps.push(command_step.into());
        }
        Ok(steps)
    }

    /// AMD mirrors of the test steps whose `mirror_hardwares` include AMD.
    ///
    /// # Errors
    ///
    /// Returns [`kiteplan_core::Error::UnresolvableQueue`] if the AMD queue has no name.
    pub fn mirrored_amd_steps(&self, test_steps: &[TestStep]) -> Result<Vec<Step>> {
        let amd = &self.defaults.amd;
        let queue = self.defaults.queue_name(AgentQueue::AmdGpu)?;

        Ok(test_steps
            .iter()
            .filter(|step| step.mirrors_to(&amd.mirror_tag))
            .map(|step| {
                let mut command_step = CommandStep::new(
                    format!("AMD: {}", step.label),
                    format!("amd_{}", step.key()),
                    queue,
                );
                command_step.commands = Some(vec![get_wrapped_test_command(&amd.test_script, step)]);
                command_step.soft_fail = Some(true);
                command_step.depends_on = Some(amd.build_key.clone());
                command_step.env = Some(docker_buildkit_env());
                command_step.into()
            })
            .collect())
    }

    /// Compile the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns the first error any step produces; no partial pipeline is
    /// returned.
    #[instrument(skip_all, fields(commit = %self.config.commit, run_all = self.config.run_all))]
    pub fn generate(&self, test_steps: &[TestStep], external_steps: &[TestStep]) -> Result<Pipeline> {
        let mut steps: Vec<Step> = vec![self.generate_build_step()?.into()];

        let compiled = test_steps
            .iter()
            .map(|step| self.test_step_to_steps(step))
            .collect::<Result<Vec<_>>>()?;
        let gated = compiled.iter().filter(|s| s.len() > 1).count();
        steps.extend(compiled.into_iter().flatten());

        let external = self.external_hardware_steps(external_steps)?;
        let mirrored = self.mirrored_amd_steps(test_steps)?;
        info!(
            test_steps = test_steps.len(),
            gated,
            external_steps = external_steps.len(),
            mirrored = mirrored.len(),
            "Compiled pipeline"
        );
        steps.extend(external);
        steps.extend(mirrored);

        Ok(Pipeline { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use kiteplan_core::RawTestStep;

    const TEST_COMMIT: &str = "123456789abcdef123456789abcdef123456789a";

    fn generator(run_all: bool, diff: &[&str]) -> PipelineGenerator {
        let config = PlanConfig::new(
            "container.registry",
            "test",
            TEST_COMMIT,
            run_all,
            diff.iter().map(|s| (*s).to_string()).collect(),
        )
        .unwrap();
        PipelineGenerator::new(config).unwrap()
    }

    fn step(raw: RawTestStep) -> TestStep {
        TestStep::from_raw(raw).unwrap()
    }

    fn simple(label: &str) -> RawTestStep {
        RawTestStep {
            label: label.to_string(),
            command: Some("pytest -v -s a".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_get_block_step() {
        for (label, block, key) in [
            ("Test Step", "Run Test Step", "block-test-step"),
            ("Test Step 2", "Run Test Step 2", "block-test-step-2"),
            ("Test (Step)", "Run Test (Step)", "block-test-step"),
            ("Test A, B, C", "Run Test A, B, C", "block-test-a-b-c"),
        ] {
            let b = get_block_step(label);
            assert_eq!(b.block, block);
            assert_eq!(b.key, key);
            assert_eq!(b.depends_on.as_deref(), Some(BUILD_STEP_KEY));
        }
    }

    #[test]
    fn test_generate_build_step() {
        let g = generator(false, &[]);
        let build = g.generate_build_step().unwrap();
        assert_eq!(build.label, ":docker: build image");
        assert_eq!(build.key, "build");
        assert_eq!(build.agents.queue, "cpu_queue");
        assert!(build.depends_on.is_none());
        assert_eq!(build.env.unwrap()["DOCKER_BUILDKIT"], "1");
        assert_eq!(build.commands.unwrap().len(), 4);
        let Some(AutomaticRetry::Config(rules)) = build.retry.unwrap().automatic else {
            panic!("expected retry rules");
        };
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].exit_status, Some(-1));
        assert_eq!(rules[1].exit_status, Some(-10));
    }

    #[test]
    fn test_invalid_commit_rejected() {
        let config = PlanConfig {
            container_registry: "r".to_string(),
            container_registry_repo: "repo".to_string(),
            commit: "HEAD".to_string(),
            run_all: false,
            list_file_diff: vec![],
        };
        assert!(PipelineGenerator::new(config).is_err());
    }

    #[test]
    fn test_step_to_buildkite_docker() {
        let g = generator(false, &[]);
        let mut raw = simple("Test Step");
        raw.soft_fail = Some(true);
        raw.parallelism = Some(4);
        let cs = g.step_to_buildkite(&step(raw)).unwrap();
        assert_eq!(cs.key, "test-step");
        assert_eq!(cs.agents.queue, "gpu_1_queue");
        assert!(cs.commands.is_none());
        assert_eq!(cs.soft_fail, Some(true));
        assert_eq!(cs.parallelism, Some(4));
        assert_eq!(cs.depends_on.as_deref(), Some("build"));
        let plugins = cs.plugins.unwrap();
        let Plugin::Docker(entry) = &plugins[0] else {
            panic!("expected docker plugin");
        };
        assert_eq!(
            entry.docker.image,
            "container.registry/test:123456789abcdef123456789abcdef123456789a"
        );
    }

    #[test]
    fn test_step_to_buildkite_queues() {
        let g = generator(false, &[]);

        let mut raw = simple("CPU");
        raw.no_gpu = Some(true);
        assert_eq!(g.step_to_buildkite(&step(raw)).unwrap().agents.queue, "small_cpu_queue");

        let mut raw = simple("Four GPUs");
        raw.num_gpus = Some(4);
        assert_eq!(g.step_to_buildkite(&step(raw)).unwrap().agents.queue, "gpu_4_queue");

        let mut raw = simple("A100");
        raw.gpu = Some("a100".to_string());
        raw.num_gpus = Some(4);
        let cs = g.step_to_buildkite(&step(raw)).unwrap();
        assert_eq!(cs.agents.queue, "a100-queue");
        assert!(matches!(cs.plugins.unwrap()[0], Plugin::Kubernetes(_)));
    }

    #[test]
    fn test_gated_step_depends_on_block() {
        let g = generator(false, &["dir2/x"]);
        let mut raw = simple("Test (Step)");
        raw.source_file_dependencies = Some(vec!["dir1/".to_string()]);
        let steps = g.test_step_to_steps(&step(raw)).unwrap();
        assert_eq!(steps.len(), 2);
        let block = steps[0].as_block().unwrap();
        let command = steps[1].as_command().unwrap();
        assert_eq!(block.key, format!("block-{}", command.key));
        assert_eq!(command.depends_on.as_deref(), Some(block.key.as_str()));
    }

    #[test]
    fn test_ungated_step_depends_on_build() {
        let g = generator(false, &["dir1/a.py"]);
        let mut raw = simple("Test");
        raw.source_file_dependencies = Some(vec!["dir1/".to_string()]);
        let steps = g.test_step_to_steps(&step(raw)).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].depends_on(), Some("build"));
    }

    #[test]
    fn test_external_hardware_steps() {
        let mut defaults = Defaults::default();
        defaults.steps_to_block = vec!["amd-kernels".to_string()];
        let config = PlanConfig::new("r", "repo", TEST_COMMIT, false, vec![]).unwrap();
        let g = PipelineGenerator::with_defaults(config, defaults).unwrap();

        let mut amd_build = simple("AMD Build");
        amd_build.command = Some("docker build -t DOCKER_IMAGE_AMD . && docker push DOCKER_IMAGE_AMD".to_string());
        amd_build.no_gpu = Some(true);
        let kernels = simple("AMD Kernels");

        let steps = g
            .external_hardware_steps(&[step(amd_build), step(kernels)])
            .unwrap();
        assert_eq!(steps.len(), 3);

        let build = steps[0].as_command().unwrap();
        assert_eq!(build.key, "amd-build");
        assert_eq!(build.agents.queue, "amd-cpu");
        assert_eq!(build.depends_on.as_deref(), Some("build"));
        assert_eq!(
            build.commands.as_ref().unwrap()[0],
            format!("docker build -t rocm/vllm-ci:{TEST_COMMIT} . && docker push rocm/vllm-ci:{TEST_COMMIT}")
        );

        let block = steps[1].as_block().unwrap();
        assert_eq!(block.key, "block-amd-kernels");
        let kernels = steps[2].as_command().unwrap();
        assert_eq!(kernels.agents.queue, "amd");
        assert_eq!(kernels.depends_on.as_deref(), Some("block-amd-kernels"));
    }

    #[test]
    fn test_mirrored_amd_steps() {
        let g = generator(false, &[]);
        let mut mirrored = simple("Basic Correctness");
        mirrored.mirror_hardwares = Some(vec!["amd".to_string()]);
        mirrored.gpu = Some("a100".to_string());
        mirrored.num_gpus = Some(2);
        let plain = simple("Plain");

        let steps = g.mirrored_amd_steps(&[step(plain), step(mirrored)]).unwrap();
        assert_eq!(steps.len(), 1);
        let cs = steps[0].as_command().unwrap();
        assert_eq!(cs.label, "AMD: Basic Correctness");
        assert_eq!(cs.key, "amd_basic-correctness");
        assert_eq!(cs.agents.queue, "amd");
        assert_eq!(cs.depends_on.as_deref(), Some("amd-build"));
        assert_eq!(cs.soft_fail, Some(true));
        assert!(cs.plugins.is_none());
        let commands = cs.commands.as_ref().unwrap();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].starts_with("bash .buildkite/run-amd-test.sh "));
        assert!(commands[0].contains("pytest -v -s a"));
        assert!(!commands[0].contains("nvidia-smi"));
    }

    #[test]
    fn test_generate_ordering() {
        let g = generator(false, &["vllm/other.py"]);
        let mut gated = simple("Gated");
        gated.source_file_dependencies = Some(vec!["tests/gated".to_string()]);
        let mut mirrored = simple("Mirrored");
        mirrored.mirror_hardwares = Some(vec!["amd".to_string()]);
        let external = simple("AMD External");

        let pipeline = g
            .generate(
                &[step(simple("First")), step(gated), step(mirrored)],
                &[step(external)],
            )
            .unwrap();
        let keys: Vec<&str> = pipeline.keys().collect();
        assert_eq!(
            keys,
            vec![
                "build",
                "first",
                "block-gated",
                "gated",
                "mirrored",
                "amd-external",
                "amd_mirrored",
            ]
        );
    }
}
