//! Commands of the image build step.

/// Commands that log into the registry, skip the build when the image
/// already exists, and otherwise build and push it.
#[must_use]
pub fn get_build_commands(container_registry: &str, commit: &str, container_image: &str) -> Vec<String> {
    let ecr_login_command = format!(
        "aws ecr-public get-login-password --region us-east-1 | \
         docker login --username AWS --password-stdin {container_registry}"
    );
    let image_check_command = format!(
        "#!/bin/bash\n\
         if [[ -z $(docker manifest inspect {container_image}) ]]; then\n\
         echo \"Image not found, proceeding with build...\"\n\
         else\n\
         echo \"Image found\"\n\
         exit 0\n\
         fi\n"
    );
    let docker_build_command = format!(
        "docker build \
         --build-arg max_jobs=64 \
         --build-arg buildkite_commit={commit} \
         --build-arg USE_SCCACHE=1 \
         --tag {container_image} \
         --target test \
         --progress plain ."
    );
    let docker_push_command = format!("docker push {container_image}");

    vec![
        ecr_login_command,
        image_check_command,
        docker_build_command,
        docker_push_command,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_CONTAINER_REGISTRY: &str = "container.registry";
    const TEST_COMMIT: &str = "abcdef0123456789abcdef0123456789abcdef01";
    const TEST_CONTAINER_IMAGE: &str =
        "container.registry/test:abcdef0123456789abcdef0123456789abcdef01";

    #[test]
    fn test_get_build_commands() {
        let commands = get_build_commands(TEST_CONTAINER_REGISTRY, TEST_COMMIT, TEST_CONTAINER_IMAGE);
        assert_eq!(commands.len(), 4);

        assert_eq!(
            commands[0],
            "aws ecr-public get-login-password --region us-east-1 | \
             docker login --username AWS --password-stdin container.registry"
        );

        assert!(commands[1].starts_with("#!/bin/bash"));
        assert!(commands[1].contains(
            "$(docker manifest inspect container.registry/test:abcdef0123456789abcdef0123456789abcdef01)"
        ));
        assert!(commands[1].contains("exit 0"));

        assert!(commands[2].starts_with("docker build"));
        assert!(commands[2].contains(
            "--tag container.registry/test:abcdef0123456789abcdef0123456789abcdef01"
        ));
        assert!(commands[2].contains(
            "--build-arg buildkite_commit=abcdef0123456789abcdef0123456789abcdef01"
        ));
        assert!(commands[2].ends_with(" ."));

        assert_eq!(
            commands[3],
            "docker push container.registry/test:abcdef0123456789abcdef0123456789abcdef01"
        );
    }
}
